//! # Session Rule Tests
//!
//! The writer/reader exclusion rules, buffer binding validation, and the
//! per-value conversion/bounds checks of the streaming sessions.

use e57rs::{ErrorCode, ImageFile, MemoryRepresentation, Node, SourceDestBuffer};
use tempfile::tempdir;

fn simple_vector(imf: &ImageFile, name: &str) -> Node {
    let cv = imf.new_compressed_vector();
    let proto = imf.new_structure();
    proto.set_child("x", &imf.new_integer(0, 255)).unwrap();
    cv.set_prototype(&proto).unwrap();
    imf.root().set_child(name, &cv).unwrap();
    cv
}

fn x_buf(values: Vec<i64>) -> SourceDestBuffer {
    SourceDestBuffer::i64_values("x", values)
}

mod exclusion_rules {
    use super::*;

    #[test]
    fn second_writer_on_same_container_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("excl.e57")).unwrap();
        let cv_a = simple_vector(&imf, "a");
        let cv_b = simple_vector(&imf, "b");

        let writer_a = cv_a.writer(vec![x_buf(vec![1])]).unwrap();
        let err = cv_b.writer(vec![x_buf(vec![2])]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooManyWriters);
        drop(writer_a);
    }

    #[test]
    fn reader_while_writer_open_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("excl2.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let writer = cv.writer(vec![x_buf(vec![1])]).unwrap();
        let out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 1);
        let err = cv.reader(vec![out]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooManyWriters);
        drop(writer);
    }

    #[test]
    fn writer_while_reader_open_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("excl3.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let mut writer = cv.writer(vec![x_buf(vec![1])]).unwrap();
        writer.write(1).unwrap();
        writer.close().unwrap();

        let out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 1);
        let reader = cv.reader(vec![out]).unwrap();
        let err = cv.writer(vec![x_buf(vec![1])]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooManyReaders);
        drop(reader);
    }

    #[test]
    fn second_reader_fails_and_slot_frees_on_close() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("excl4.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let mut writer = cv.writer(vec![x_buf(vec![1, 2])]).unwrap();
        writer.write(2).unwrap();
        writer.close().unwrap();

        let out_a = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 2);
        let out_b = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 2);
        let mut reader_a = cv.reader(vec![out_a]).unwrap();
        let err = cv.reader(vec![out_b.clone()]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooManyReaders);

        reader_a.close().unwrap();
        assert_eq!(imf.reader_count(), 0);
        let reader_b = cv.reader(vec![out_b]).unwrap();
        drop(reader_b);
    }

    #[test]
    fn dropped_writer_releases_the_slot() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("excl5.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        {
            let _writer = cv.writer(vec![x_buf(vec![1])]).unwrap();
            assert_eq!(imf.writer_count(), 1);
        }
        assert_eq!(imf.writer_count(), 0);
        let writer = cv.writer(vec![x_buf(vec![1])]).unwrap();
        drop(writer);
    }
}

mod writer_lifecycle {
    use super::*;

    #[test]
    fn write_after_close_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("wl.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let mut writer = cv.writer(vec![x_buf(vec![1])]).unwrap();
        writer.write(1).unwrap();
        writer.close().unwrap();

        assert_eq!(writer.write(1).unwrap_err().code(), ErrorCode::WriterNotOpen);
        assert_eq!(writer.close().unwrap_err().code(), ErrorCode::WriterNotOpen);
    }

    #[test]
    fn write_beyond_capacity_fails_without_committing() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("cap.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let mut writer = cv.writer(vec![x_buf(vec![1, 2, 3])]).unwrap();
        let err = writer.write(4).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadApiArgument);
        writer.close().unwrap();
        assert_eq!(cv.child_count().unwrap(), 0);
    }

    #[test]
    fn out_of_bounds_value_drops_the_record() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("oob.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let x = x_buf(vec![300]);
        let mut writer = cv.writer(vec![x.clone()]).unwrap();
        let err = writer.write(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValueOutOfBounds);

        // the failing record was dropped whole; the session stays usable
        x.set_i64_values(vec![5, 6]).unwrap();
        writer.write(2).unwrap();
        writer.close().unwrap();
        assert_eq!(cv.child_count().unwrap(), 2);

        let out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 2);
        let mut reader = cv.reader(vec![out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 2);
        reader.close().unwrap();
        assert_eq!(out.i64_data().unwrap(), vec![5, 6]);
    }

    #[test]
    fn writer_on_read_only_container_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.e57");
        {
            let imf = ImageFile::create(&path).unwrap();
            let cv = simple_vector(&imf, "a");
            let mut writer = cv.writer(vec![x_buf(vec![1])]).unwrap();
            writer.write(1).unwrap();
            writer.close().unwrap();
            imf.close().unwrap();
        }

        let imf = ImageFile::open(&path).unwrap();
        let cv = imf.root().get("a").unwrap();
        let err = cv.writer(vec![x_buf(vec![1])]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileReadOnly);
    }
}

mod reader_lifecycle {
    use super::*;

    fn written_vector(imf: &ImageFile) -> Node {
        let cv = simple_vector(imf, "a");
        let mut writer = cv.writer(vec![x_buf(vec![10, 20, 30])]).unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();
        cv
    }

    #[test]
    fn read_and_seek_after_close_fail() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("rl.e57")).unwrap();
        let cv = written_vector(&imf);

        let out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 3);
        let mut reader = cv.reader(vec![out]).unwrap();
        reader.close().unwrap();

        assert_eq!(reader.read().unwrap_err().code(), ErrorCode::ReaderNotOpen);
        assert_eq!(reader.seek(0).unwrap_err().code(), ErrorCode::ReaderNotOpen);
        assert_eq!(reader.close().unwrap_err().code(), ErrorCode::ReaderNotOpen);
    }

    #[test]
    fn seek_past_record_count_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("seek.e57")).unwrap();
        let cv = written_vector(&imf);

        let out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 3);
        let mut reader = cv.reader(vec![out]).unwrap();
        reader.seek(3).unwrap();
        let err = reader.seek(4).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadApiArgument);
        reader.close().unwrap();
    }
}

mod buffer_binding {
    use super::*;

    fn two_field_vector(imf: &ImageFile) -> Node {
        let cv = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("x", &imf.new_integer(0, 255)).unwrap();
        proto.set_child("s", &imf.new_string_value("")).unwrap();
        cv.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &cv).unwrap();
        cv
    }

    #[test]
    fn duplicate_buffer_paths_fail() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("dup.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let err = cv
            .writer(vec![x_buf(vec![1]), x_buf(vec![2])])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BufferDuplicatePathName);
    }

    #[test]
    fn mismatched_capacities_fail() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("mismatch.e57")).unwrap();
        let cv = two_field_vector(&imf);

        let err = cv
            .writer(vec![
                x_buf(vec![1, 2, 3]),
                SourceDestBuffer::string_values("s", vec!["a".into()]),
            ])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BufferSizeMismatch);
    }

    #[test]
    fn missing_buffer_for_a_leaf_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("missing.e57")).unwrap();
        let cv = two_field_vector(&imf);

        let err = cv.writer(vec![x_buf(vec![1])]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoBufferForElement);
    }

    #[test]
    fn unknown_buffer_path_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("unknown.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let err = cv
            .writer(vec![SourceDestBuffer::i64_values("nope", vec![1])])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadPathName);
    }

    #[test]
    fn representation_mismatch_without_conversion_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("convreq.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let err = cv
            .writer(vec![SourceDestBuffer::i32_values("x", vec![1])])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConversionRequired);
    }

    #[test]
    fn string_buffer_on_numeric_leaf_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("expnum.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let err = cv
            .writer(vec![SourceDestBuffer::string_values("x", vec!["1".into()])])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExpectingNumeric);
    }

    #[test]
    fn numeric_buffer_on_string_leaf_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("expstr.e57")).unwrap();
        let cv = two_field_vector(&imf);

        let err = cv
            .writer(vec![
                x_buf(vec![1]),
                SourceDestBuffer::i64_values("s", vec![0]),
            ])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExpectingUString);
    }

    #[test]
    fn empty_buffer_storage_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("badbuf.e57")).unwrap();
        let cv = simple_vector(&imf, "a");

        let err = cv.writer(vec![x_buf(Vec::new())]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadBuffer);
    }
}

mod conversion_errors {
    use super::*;

    #[test]
    fn float_overflow_into_single_field_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("r64big.e57")).unwrap();
        let cv = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("r", &imf.new_float_single()).unwrap();
        cv.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &cv).unwrap();

        let mut writer = cv
            .writer(vec![
                SourceDestBuffer::f64_values("r", vec![1e300]).with_conversion(),
            ])
            .unwrap();
        let err = writer.write(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Real64TooLarge);
        writer.close().unwrap();
    }

    #[test]
    fn scaled_domain_value_outside_raw_range_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("scaledrange.e57")).unwrap();
        let cv = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto
            .set_child("t", &imf.new_scaled_integer(-1000, 1000, 0.001, 0.0))
            .unwrap();
        cv.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &cv).unwrap();

        let mut writer = cv
            .writer(vec![
                SourceDestBuffer::f64_values("t", vec![2.0]).with_scaling(),
            ])
            .unwrap();
        let err = writer.write(1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ScaledValueNotRepresentable);
        writer.close().unwrap();
    }

    #[test]
    fn narrowing_overflow_on_read_fails() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("narrowread.e57")).unwrap();
        let cv = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("x", &imf.new_integer(0, 1000)).unwrap();
        cv.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &cv).unwrap();

        let mut writer = cv
            .writer(vec![SourceDestBuffer::i64_values("x", vec![900])])
            .unwrap();
        writer.write(1).unwrap();
        writer.close().unwrap();

        let out = SourceDestBuffer::destination("x", MemoryRepresentation::UInt8, 1)
            .with_conversion();
        let mut reader = cv.reader(vec![out]).unwrap();
        let err = reader.read().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValueNotRepresentable);
        reader.close().unwrap();
    }
}
