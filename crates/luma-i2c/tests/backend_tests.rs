//! End-to-end tests for the multiplexing backends: drop accounting, frame
//! length changes, latch bytes, and invalid outputs, against a fake bus
//! writer that can stall the worker thread mid-write.

use std::sync::Arc;

use luma_i2c::backend::{
    Backend, HardwareBackend, HardwareBackendOptions, SoftwareBackend, SoftwareBackendOptions,
};
use luma_i2c::metrics::{ExportMap, I2C_DROP_VAR};
use luma_i2c::testing::FakeI2cWriter;
use luma_i2c::writer::I2cWriter;

const DEVICE_NAME: &str = "Fake Device";

const DATA1: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0];
const DATA2: [u8; 6] = [0xa, 0xb, 0xc, 0xd, 0xe, 0xf];
const DATA3: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0xa, 0xb, 0xc, 0xd, 0xe, 0xf];

const EXPECTED1: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0, 0, 0, 0, 0, 0];
const EXPECTED2: [u8; 16] = [0xa, 0xb, 0xc, 0xd, 0xe, 0xf, 7, 8, 9, 0, 0, 0, 0, 0, 0, 0];
const EXPECTED3: [u8; 20] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0xa, 0xb, 0xc, 0xd, 0xe, 0xf, 0, 0, 0, 0,
];
const EXPECTED4: [u8; 20] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// The checkout size every test uses; DATA3 fills it exactly.
const CHECKOUT_SIZE: usize = DATA3.len();

fn fake_writer() -> Arc<FakeI2cWriter> {
    Arc::new(FakeI2cWriter::new(DEVICE_NAME))
}

fn send_some_data(
    backend: &dyn Backend,
    output: u8,
    data: &[u8],
    checkout_size: usize,
    latch_bytes: usize,
) -> bool {
    let Some(mut buffer) = backend.checkout(output, checkout_size, latch_bytes) else {
        return false;
    };
    buffer[..data.len()].copy_from_slice(data);
    drop(buffer);
    backend.commit(output);
    true
}

/// A blocked writer accumulates at most one pending frame per output; the
/// surplus is counted as drops.
#[test]
fn test_hardware_drops() {
    let writer = fake_writer();
    let export_map = ExportMap::new();
    let backend = HardwareBackend::new(
        &HardwareBackendOptions::default(),
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    backend.init().unwrap();

    writer.block();
    assert_eq!(export_map.get(I2C_DROP_VAR, DEVICE_NAME), 0);

    assert!(send_some_data(&backend, 0, &DATA1, CHECKOUT_SIZE, 0));
    // Once the write is visible the worker is stalled inside the writer.
    writer.wait_for_write();
    assert_eq!(writer.write_count(), 1);

    assert!(send_some_data(&backend, 0, &DATA1, CHECKOUT_SIZE, 0));
    assert!(send_some_data(&backend, 0, &DATA1, CHECKOUT_SIZE, 0));
    assert_eq!(export_map.get(I2C_DROP_VAR, DEVICE_NAME), 1);

    writer.reset_write();
    writer.unblock();
    writer.wait_for_write();
    assert_eq!(writer.write_count(), 2);
}

#[test]
fn test_software_drops() {
    let writer = fake_writer();
    let export_map = ExportMap::new();
    let backend = SoftwareBackend::new(
        &SoftwareBackendOptions::default(),
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    backend.init().unwrap();

    writer.block();
    assert_eq!(export_map.get(I2C_DROP_VAR, DEVICE_NAME), 0);

    assert!(send_some_data(&backend, 0, &DATA1, CHECKOUT_SIZE, 0));
    writer.wait_for_write();
    assert_eq!(writer.write_count(), 1);

    assert!(send_some_data(&backend, 0, &DATA1, CHECKOUT_SIZE, 0));
    assert!(send_some_data(&backend, 0, &DATA1, CHECKOUT_SIZE, 0));
    assert_eq!(export_map.get(I2C_DROP_VAR, DEVICE_NAME), 1);

    writer.reset_write();
    writer.unblock();
    writer.wait_for_write();
    assert_eq!(writer.write_count(), 2);
}

/// Frame lengths can change between commits; the hardware backend keeps the
/// per-output allocation, so a shorter frame leaves stale tail bytes in
/// place.
#[test]
fn test_hardware_various_frame_lengths() {
    let writer = fake_writer();
    let export_map = ExportMap::new();
    let backend = HardwareBackend::new(
        &HardwareBackendOptions::default(),
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    backend.init().unwrap();

    let steps: [(&[u8], usize, &[u8]); 7] = [
        (&DATA1, 0, &EXPECTED1),
        (&DATA1, 0, &EXPECTED1),
        (&DATA2, 0, &EXPECTED2),
        (&DATA1, 0, &EXPECTED1),
        (&DATA3, 0, &DATA3),
        // With 4 latch bytes: payload keeps DATA3's tail, latch is zero.
        (&DATA1, 4, &EXPECTED3),
        (&DATA3, 4, &EXPECTED3),
    ];

    for (round, (data, latch_bytes, expected)) in steps.iter().enumerate() {
        assert!(send_some_data(&backend, 0, data, CHECKOUT_SIZE, *latch_bytes));
        writer.wait_for_write();
        assert_eq!(writer.write_count(), round as u64 + 1);
        writer.check_data_matches(expected);
        writer.reset_write();
    }
}

/// Same matrix on the software backend. A latch change forces a re-layout of
/// the concatenated buffer, so the changed output's region starts zeroed
/// instead of keeping stale bytes.
#[test]
fn test_software_various_frame_lengths() {
    let writer = fake_writer();
    let export_map = ExportMap::new();
    let backend = SoftwareBackend::new(
        &SoftwareBackendOptions::default(),
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    backend.init().unwrap();

    let steps: [(&[u8], usize, &[u8]); 7] = [
        (&DATA1, 0, &EXPECTED1),
        (&DATA1, 0, &EXPECTED1),
        (&DATA2, 0, &EXPECTED2),
        (&DATA1, 0, &EXPECTED1),
        (&DATA3, 0, &DATA3),
        (&DATA1, 4, &EXPECTED4),
        (&DATA3, 4, &EXPECTED3),
    ];

    for (round, (data, latch_bytes, expected)) in steps.iter().enumerate() {
        assert!(send_some_data(&backend, 0, data, CHECKOUT_SIZE, *latch_bytes));
        writer.wait_for_write();
        assert_eq!(writer.write_count(), round as u64 + 1);
        writer.check_data_matches(expected);
        writer.reset_write();
    }
}

/// Checkout of an out-of-range output returns nothing and nothing reaches
/// the bus.
#[test]
fn test_invalid_outputs() {
    let writer = fake_writer();
    let export_map = ExportMap::new();

    let hw_backend = HardwareBackend::new(
        &HardwareBackendOptions::default(),
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    hw_backend.init().unwrap();
    assert!(!send_some_data(&hw_backend, 1, &DATA1, CHECKOUT_SIZE, 0));
    assert_eq!(writer.write_count(), 0);

    let sw_backend = SoftwareBackend::new(
        &SoftwareBackendOptions::default(),
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    sw_backend.init().unwrap();
    assert!(!send_some_data(&sw_backend, 1, &DATA1, CHECKOUT_SIZE, 0));
    assert_eq!(writer.write_count(), 0);
}

/// Commits to a non-sync output stage bytes without writing; the sync
/// output's commit flushes the whole concatenated frame.
#[test]
fn test_software_sync_output_gates_writes() {
    let writer = fake_writer();
    let export_map = ExportMap::new();
    let backend = SoftwareBackend::new(
        &SoftwareBackendOptions {
            outputs: 2,
            sync_output: 1,
        },
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    backend.init().unwrap();

    // Staged only: output 0 is not the sync output.
    assert!(send_some_data(&backend, 0, &[1, 2, 3], 3, 0));
    assert_eq!(writer.write_count(), 0);

    // The sync output commit snapshots the composite frame.
    assert!(send_some_data(&backend, 1, &[9, 8], 2, 0));
    writer.wait_for_write();
    assert_eq!(writer.write_count(), 1);
    writer.check_data_matches(&[1, 2, 3, 9, 8]);
}

/// Every commit writes when no sync output is designated.
#[test]
fn test_software_sync_disabled_writes_on_every_commit() {
    let writer = fake_writer();
    let export_map = ExportMap::new();
    let backend = SoftwareBackend::new(
        &SoftwareBackendOptions {
            outputs: 2,
            sync_output: -1,
        },
        Arc::clone(&writer) as Arc<dyn I2cWriter>,
        &export_map,
    );
    backend.init().unwrap();

    assert!(send_some_data(&backend, 0, &[1, 2, 3], 3, 0));
    writer.wait_for_write();
    writer.reset_write();
    assert!(send_some_data(&backend, 1, &[9, 8], 2, 0));
    writer.wait_for_write();
    assert_eq!(writer.write_count(), 2);
    writer.check_data_matches(&[1, 2, 3, 9, 8]);
}
