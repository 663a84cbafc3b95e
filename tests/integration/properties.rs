//! Property-based round trips through a packed artifact.

use std::fs;

use launchpack::artifact::{ArtifactReader, ArtifactWriter, Platform};
use launchpack::engine::{CompiledProgram, EnginePropertyTable, PROPERTY_COUNT};
use launchpack::util::config::BuildConfig;
use launchpack::util::diagnostic::Diagnostics;
use proptest::prelude::*;
use tempfile::TempDir;

fn table_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(
        prop_oneof![0u64..4, 0u64..=u32::MAX as u64, any::<u64>()],
        PROPERTY_COUNT,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_bytecode_and_properties_survive(
        bytecode in prop::collection::vec(any::<u8>(), 1..4096),
        values in table_strategy(),
        level in 0u32..=9,
        platform in prop_oneof![Just(Platform::Linux), Just(Platform::Mac)],
        resources in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..3),
    ) {
        let dir = TempDir::new().unwrap();
        let stub = dir.path().join(platform.stub_file_name(None));
        fs::write(&stub, vec![0u8; 512]).unwrap();

        let config = BuildConfig {
            platform: Some(platform),
            compression_level: level,
            stub_dir: Some(dir.path().to_path_buf()),
            quiet: true,
            ..BuildConfig::default()
        };
        let table = EnginePropertyTable::from_values(values);

        let mut writer = ArtifactWriter::new(config).properties(table.clone());
        for record in &resources {
            writer = writer.resource(record.clone());
        }
        let report = writer
            .write(
                &CompiledProgram::new(bytecode.clone()),
                &dir.path().join("prog.nvgt"),
                &mut Diagnostics::new(),
            )
            .unwrap();

        let decoded = ArtifactReader::open(&report.output, platform)
            .decode(PROPERTY_COUNT)
            .unwrap();
        prop_assert_eq!(decoded.section_offset, 512);
        prop_assert_eq!(decoded.bytecode, bytecode);
        prop_assert_eq!(decoded.properties, table);
        prop_assert_eq!(decoded.resources, resources);
    }
}
