//! # Compressed Vector Round-Trip Tests
//!
//! End-to-end write/read cycles over one container:
//! 1. Integer prototypes round-trip bitwise
//! 2. Scaled-integer fields written raw read back scaled exactly
//! 3. String fields round-trip, empty and non-ASCII included
//! 4. Multi-packet sections round-trip and support seek
//! 5. A written container reopens from disk with an equivalent tree

use e57rs::{ImageFile, MemoryRepresentation, SourceDestBuffer};
use tempfile::tempdir;

mod integer_roundtrip {
    use super::*;

    #[test]
    fn two_integer_fields_roundtrip_exactly() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("ints.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("x", &imf.new_integer(0, 100)).unwrap();
        proto.set_child("y", &imf.new_integer(-50, 50)).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let mut writer = points
            .writer(vec![
                SourceDestBuffer::i64_values("x", vec![0, 100, 42]),
                SourceDestBuffer::i64_values("y", vec![-50, 50, 0]),
            ])
            .unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();

        assert_eq!(points.child_count().unwrap(), 3);

        let x_out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 3);
        let y_out = SourceDestBuffer::destination("y", MemoryRepresentation::Int64, 3);
        let mut reader = points.reader(vec![x_out.clone(), y_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 3);
        assert_eq!(reader.read().unwrap(), 0);
        reader.close().unwrap();

        assert_eq!(x_out.i64_data().unwrap(), vec![0, 100, 42]);
        assert_eq!(y_out.i64_data().unwrap(), vec![-50, 50, 0]);
    }

    #[test]
    fn single_bit_and_constant_fields_roundtrip() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("narrow.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("flag", &imf.new_integer(0, 1)).unwrap();
        proto.set_child("tag", &imf.new_integer(7, 7)).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let flags: Vec<i64> = (0..13).map(|i| i % 2).collect();
        let tags = vec![7i64; 13];
        let mut writer = points
            .writer(vec![
                SourceDestBuffer::i64_values("flag", flags.clone()),
                SourceDestBuffer::i64_values("tag", tags.clone()),
            ])
            .unwrap();
        writer.write(13).unwrap();
        writer.close().unwrap();

        let flag_out = SourceDestBuffer::destination("flag", MemoryRepresentation::Int64, 13);
        let tag_out = SourceDestBuffer::destination("tag", MemoryRepresentation::Int64, 13);
        let mut reader = points.reader(vec![flag_out.clone(), tag_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 13);
        reader.close().unwrap();

        assert_eq!(flag_out.i64_data().unwrap(), flags);
        assert_eq!(tag_out.i64_data().unwrap(), tags);
    }
}

mod scaled_integer_roundtrip {
    use super::*;

    #[test]
    fn raw_write_scaled_read_is_exact() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("scaled.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto
            .set_child("t", &imf.new_scaled_integer(-1000, 1000, 0.001, 0.0))
            .unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let mut writer = points
            .writer(vec![SourceDestBuffer::i64_values("t", vec![-1000, 0, 1000])])
            .unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();

        let t_out =
            SourceDestBuffer::destination("t", MemoryRepresentation::Real64, 3).with_scaling();
        let mut reader = points.reader(vec![t_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 3);
        reader.close().unwrap();

        assert_eq!(t_out.f64_data().unwrap(), vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn scaled_write_raw_read_preserves_raw_values() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("scaled2.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto
            .set_child("d", &imf.new_scaled_integer(-500, 500, 0.25, 10.0))
            .unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        // scaled values 10 + 0.25*raw for raw = -500, -2, 0, 3, 500
        let scaled = vec![-115.0, 9.5, 10.0, 10.75, 135.0];
        let mut writer = points
            .writer(vec![SourceDestBuffer::f64_values("d", scaled).with_scaling()])
            .unwrap();
        writer.write(5).unwrap();
        writer.close().unwrap();

        let d_out = SourceDestBuffer::destination("d", MemoryRepresentation::Int64, 5);
        let mut reader = points.reader(vec![d_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 5);
        reader.close().unwrap();

        assert_eq!(d_out.i64_data().unwrap(), vec![-500, -2, 0, 3, 500]);
    }
}

mod float_roundtrip {
    use super::*;

    #[test]
    fn float_fields_roundtrip_bitwise() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("floats.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("r32", &imf.new_float_single()).unwrap();
        proto.set_child("r64", &imf.new_float_double()).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let singles = vec![0.0f32, -0.0, 1.5, f32::MAX, f32::MIN_POSITIVE, -123.456];
        let doubles = vec![
            0.0f64,
            -0.0,
            std::f64::consts::PI,
            f64::MAX,
            f64::MIN_POSITIVE,
            1e-300,
        ];
        let mut writer = points
            .writer(vec![
                SourceDestBuffer::f32_values("r32", singles.clone()),
                SourceDestBuffer::f64_values("r64", doubles.clone()),
            ])
            .unwrap();
        writer.write(6).unwrap();
        writer.close().unwrap();

        let r32_out = SourceDestBuffer::destination("r32", MemoryRepresentation::Real32, 6);
        let r64_out = SourceDestBuffer::destination("r64", MemoryRepresentation::Real64, 6);
        let mut reader = points.reader(vec![r32_out.clone(), r64_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 6);
        reader.close().unwrap();

        let r32_back = r32_out.f32_data().unwrap();
        let r64_back = r64_out.f64_data().unwrap();
        for (a, b) in singles.iter().zip(&r32_back) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        for (a, b) in doubles.iter().zip(&r64_back) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}

mod string_roundtrip {
    use super::*;

    #[test]
    fn strings_roundtrip_in_order() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("strings.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("s", &imf.new_string_value("")).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let values: Vec<String> = vec!["".into(), "abc".into(), "αβγ".into()];
        let mut writer = points
            .writer(vec![SourceDestBuffer::string_values("s", values.clone())])
            .unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();

        let s_out = SourceDestBuffer::destination("s", MemoryRepresentation::UString, 3);
        let mut reader = points.reader(vec![s_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 3);
        reader.close().unwrap();

        assert_eq!(s_out.string_data().unwrap(), values);
    }
}

mod multi_packet {
    use super::*;

    const TOTAL: usize = 20_000;

    fn build_large(dir: &std::path::Path) -> (ImageFile, e57rs::Node, Vec<i64>, Vec<f64>) {
        let imf = ImageFile::create(dir.join("large.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("id", &imf.new_integer(0, 65535)).unwrap();
        proto.set_child("v", &imf.new_float_double()).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let ids: Vec<i64> = (0..TOTAL as i64).map(|i| i % 65536).collect();
        let vs: Vec<f64> = (0..TOTAL).map(|i| (i as f64) * 0.5 - 1000.0).collect();

        let mut writer = points
            .writer(vec![
                SourceDestBuffer::i64_values("id", ids.clone()),
                SourceDestBuffer::f64_values("v", vs.clone()),
            ])
            .unwrap();
        writer.write(TOTAL).unwrap();
        writer.close().unwrap();

        (imf, points, ids, vs)
    }

    #[test]
    fn large_section_roundtrips_across_packets() {
        let dir = tempdir().unwrap();
        let (_imf, points, ids, vs) = build_large(dir.path());

        assert_eq!(points.child_count().unwrap(), TOTAL as u64);

        let id_out = SourceDestBuffer::destination("id", MemoryRepresentation::Int64, TOTAL);
        let v_out = SourceDestBuffer::destination("v", MemoryRepresentation::Real64, TOTAL);
        let mut reader = points.reader(vec![id_out.clone(), v_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), TOTAL);
        assert_eq!(reader.read().unwrap(), 0);
        reader.close().unwrap();

        assert_eq!(id_out.i64_data().unwrap(), ids);
        assert_eq!(v_out.f64_data().unwrap(), vs);
    }

    #[test]
    fn chunked_reads_drain_the_vector() {
        let dir = tempdir().unwrap();
        let (_imf, points, ids, _vs) = build_large(dir.path());

        let chunk = 777;
        let id_out = SourceDestBuffer::destination("id", MemoryRepresentation::Int64, chunk);
        let mut reader = points.reader(vec![id_out.clone()]).unwrap();

        let mut collected = Vec::new();
        loop {
            let produced = reader.read().unwrap();
            if produced == 0 {
                break;
            }
            collected.extend_from_slice(&id_out.i64_data().unwrap()[..produced]);
        }
        reader.close().unwrap();

        assert_eq!(collected, ids);
    }

    #[test]
    fn seek_matches_sequential_suffix() {
        let dir = tempdir().unwrap();
        let (_imf, points, ids, _vs) = build_large(dir.path());

        for start in [0usize, 1, 7, 12_345, TOTAL - 1, TOTAL] {
            let want = &ids[start..];
            let cap = want.len().max(1);
            let id_out = SourceDestBuffer::destination("id", MemoryRepresentation::Int64, cap);
            let mut reader = points.reader(vec![id_out.clone()]).unwrap();
            reader.seek(start as u64).unwrap();
            let produced = reader.read().unwrap();
            assert_eq!(produced, want.len(), "seek to {}", start);
            assert_eq!(&id_out.i64_data().unwrap()[..produced], want);
            reader.close().unwrap();
        }
    }

    #[test]
    fn seek_uses_index_entries_across_many_packets() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("indexed.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("v", &imf.new_float_double()).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let total = 60_000usize;
        let vs: Vec<f64> = (0..total).map(|i| i as f64 * 0.125).collect();
        let mut writer = points
            .writer(vec![SourceDestBuffer::f64_values("v", vs.clone())])
            .unwrap();
        writer.write(total).unwrap();
        writer.close().unwrap();

        for start in [55_000usize, 58_000, 59_999] {
            let want = &vs[start..];
            let out =
                SourceDestBuffer::destination("v", MemoryRepresentation::Real64, want.len());
            let mut reader = points.reader(vec![out.clone()]).unwrap();
            reader.seek(start as u64).unwrap();
            assert_eq!(reader.read().unwrap(), want.len());
            assert_eq!(&out.f64_data().unwrap()[..], want);
            reader.close().unwrap();
        }
    }

    #[test]
    fn strings_across_packets_roundtrip() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("bigstr.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("name", &imf.new_string_value("")).unwrap();
        proto.set_child("k", &imf.new_integer(0, 1023)).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let total = 12_000usize;
        let names: Vec<String> = (0..total)
            .map(|i| format!("station-{:03}-long-label-padding", i % 20))
            .collect();
        let ks: Vec<i64> = (0..total as i64).map(|i| i % 1024).collect();

        let mut writer = points
            .writer(vec![
                SourceDestBuffer::string_values("name", names.clone()),
                SourceDestBuffer::i64_values("k", ks.clone()),
            ])
            .unwrap();
        writer.write(total).unwrap();
        writer.close().unwrap();

        let name_out = SourceDestBuffer::destination("name", MemoryRepresentation::UString, total);
        let k_out = SourceDestBuffer::destination("k", MemoryRepresentation::Int64, total);
        let mut reader = points.reader(vec![name_out.clone(), k_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), total);
        reader.close().unwrap();

        assert_eq!(name_out.string_data().unwrap(), names);
        assert_eq!(k_out.i64_data().unwrap(), ks);
    }
}

mod reopen {
    use super::*;

    #[test]
    fn written_container_reopens_and_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.e57");

        let xs = vec![3i64, 1, 4, 1, 5, 9, 2, 6];
        {
            let imf = ImageFile::create(&path).unwrap();
            let points = imf.new_compressed_vector();
            let proto = imf.new_structure();
            proto.set_child("x", &imf.new_integer(0, 9)).unwrap();
            points.set_prototype(&proto).unwrap();
            imf.root().set_child("points", &points).unwrap();

            let mut writer = points
                .writer(vec![SourceDestBuffer::i64_values("x", xs.clone())])
                .unwrap();
            writer.write(xs.len()).unwrap();
            writer.close().unwrap();
            imf.close().unwrap();
        }

        let imf = ImageFile::open(&path).unwrap();
        assert!(!imf.is_writer());
        let points = imf.root().get("points").unwrap();
        assert_eq!(points.child_count().unwrap(), xs.len() as u64);

        let proto = points.prototype().unwrap().unwrap();
        let x_leaf = proto.get("x").unwrap();
        assert_eq!(x_leaf.integer_bounds().unwrap(), (0, 9));

        let x_out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, xs.len());
        let mut reader = points.reader(vec![x_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), xs.len());
        reader.close().unwrap();
        assert_eq!(x_out.i64_data().unwrap(), xs);
        imf.close().unwrap();
    }

    #[test]
    fn empty_vector_roundtrips_with_zero_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty_vec.e57");

        {
            let imf = ImageFile::create(&path).unwrap();
            let points = imf.new_compressed_vector();
            let proto = imf.new_structure();
            proto.set_child("x", &imf.new_integer(0, 9)).unwrap();
            points.set_prototype(&proto).unwrap();
            imf.root().set_child("points", &points).unwrap();

            let mut writer = points
                .writer(vec![SourceDestBuffer::i64_values("x", vec![0])])
                .unwrap();
            writer.write(0).unwrap();
            writer.close().unwrap();
            assert_eq!(points.child_count().unwrap(), 0);
            imf.close().unwrap();
        }

        let imf = ImageFile::open(&path).unwrap();
        let points = imf.root().get("points").unwrap();
        assert_eq!(points.child_count().unwrap(), 0);

        let x_out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, 4);
        let mut reader = points.reader(vec![x_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 0);
        reader.close().unwrap();
        imf.close().unwrap();
    }
}

mod conversion {
    use super::*;

    #[test]
    fn narrow_source_wide_destination_roundtrip() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("conv.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("x", &imf.new_integer(-100, 100)).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let mut writer = points
            .writer(vec![
                SourceDestBuffer::i16_values("x", vec![-100, 0, 100]).with_conversion(),
            ])
            .unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();

        let x_out =
            SourceDestBuffer::destination("x", MemoryRepresentation::Int32, 3).with_conversion();
        let mut reader = points.reader(vec![x_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 3);
        reader.close().unwrap();
        assert_eq!(x_out.i32_data().unwrap(), vec![-100, 0, 100]);
    }

    #[test]
    fn unbound_fields_are_skipped_on_read() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("subset.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        proto.set_child("a", &imf.new_integer(0, 7)).unwrap();
        proto.set_child("b", &imf.new_integer(0, 7)).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let mut writer = points
            .writer(vec![
                SourceDestBuffer::i64_values("a", vec![1, 2, 3]),
                SourceDestBuffer::i64_values("b", vec![4, 5, 6]),
            ])
            .unwrap();
        writer.write(3).unwrap();
        writer.close().unwrap();

        let b_out = SourceDestBuffer::destination("b", MemoryRepresentation::Int64, 3);
        let mut reader = points.reader(vec![b_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 3);
        reader.close().unwrap();
        assert_eq!(b_out.i64_data().unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn nested_prototype_uses_dotted_paths() {
        let dir = tempdir().unwrap();
        let imf = ImageFile::create(dir.path().join("nested.e57")).unwrap();

        let points = imf.new_compressed_vector();
        let proto = imf.new_structure();
        let pose = imf.new_structure();
        pose.set_child("x", &imf.new_integer(0, 1000)).unwrap();
        pose.set_child("y", &imf.new_integer(0, 1000)).unwrap();
        proto.set_child("pose", &pose).unwrap();
        points.set_prototype(&proto).unwrap();
        imf.root().set_child("points", &points).unwrap();

        let mut writer = points
            .writer(vec![
                SourceDestBuffer::i64_values("pose.x", vec![10, 20]),
                SourceDestBuffer::i64_values("pose.y", vec![30, 40]),
            ])
            .unwrap();
        writer.write(2).unwrap();
        writer.close().unwrap();

        let x_out = SourceDestBuffer::destination("pose.x", MemoryRepresentation::Int64, 2);
        let y_out = SourceDestBuffer::destination("pose.y", MemoryRepresentation::Int64, 2);
        let mut reader = points.reader(vec![x_out.clone(), y_out.clone()]).unwrap();
        assert_eq!(reader.read().unwrap(), 2);
        reader.close().unwrap();
        assert_eq!(x_out.i64_data().unwrap(), vec![10, 20]);
        assert_eq!(y_out.i64_data().unwrap(), vec![30, 40]);
    }
}
