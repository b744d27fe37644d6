mod common;

use std::io::Cursor;

use rstest::rstest;
use texpack_codec::Level;
use texpack_loader::device::soft::{
    SoftAsyncEngine, SoftBuffer, SoftDevice, SoftGpuDecompressor,
};
use texpack_loader::*;

use common::*;

fn final_buffer(batch: &BufferBatch<SoftDevice>) -> &SoftBuffer {
    batch.final_buffer.as_ref().unwrap()
}

#[test]
fn mixed_set_on_cpu() {
    init_logs();
    let a = sample(100, 1);
    let b = sample(300, 2);

    let mut builder = PackBuilder::new();
    builder.add_uncompressed(&a);
    builder.add_compressed(&b).unwrap();
    builder.add_absent();
    let (data, index) = builder.finish();

    let device = SoftDevice::new();
    let mut executor = Executor::new(&device, Backends::cpu_only());
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    let kinds: Vec<_> = plan.tasks.iter().map(|t| t.kind()).collect();
    assert_eq!(
        kinds,
        [
            PipelineKind::ReadUncompressed,
            PipelineKind::DecompressOnCpu,
            PipelineKind::None
        ]
    );
    assert_eq!(plan.sizes.get(Category::Final), 100 + 300);

    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();
    assert!(batch.temp.is_none());

    let report = executor
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped, 1);

    let output = final_buffer(&batch);
    assert_eq!(range_bytes(output, ranges[0].unwrap()), a);
    assert_eq!(range_bytes(output, ranges[1].unwrap()), b);
    assert!(!batch.staging.as_ref().unwrap().is_mapped());
    assert_eq!(device.submissions(), 1);
}

#[test]
fn gpu_extension_decompresses_through_temp() {
    init_logs();
    let payloads = [sample(70_000, 3), sample(4095, 4)];
    let mut builder = PackBuilder::new();
    for p in &payloads {
        builder.add_compressed(p).unwrap();
    }
    let (data, index) = builder.finish();

    let device = SoftDevice::new();
    let gpu = SoftGpuDecompressor::new();
    let mut executor = Executor::new(&device, Backends::cpu_only().with_gpu(&gpu));
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    assert!(
        plan.tasks
            .iter()
            .all(|t| t.kind() == PipelineKind::DecompressWithGpuExtension)
    );
    assert_eq!(plan.sizes.get(Category::Temp), plan.sizes.get(Category::Final));

    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();
    let report = executor
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(gpu.calls(), 2);
    assert!(device.faults().is_empty(), "{:?}", device.faults());
    for (range, payload) in ranges.iter().zip(&payloads) {
        assert_eq!(&range_bytes(final_buffer(&batch), range.unwrap()), payload);
    }
}

#[test]
fn read_failure_only_fails_its_task() {
    init_logs();
    let buffers = [sample(40, 5), sample(64, 6), sample(24, 7)];
    let mut builder = PackBuilder::new();
    for b in &buffers {
        builder.add_uncompressed(b);
    }
    let (data, index) = builder.finish();
    let second = index.buffer_footprint(1).unwrap().range_in_stream;

    let device = SoftDevice::new();
    let mut executor = Executor::new(&device, Backends::cpu_only());
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();

    let mut stream = FaultyStream::new(data, second.offset + 10);
    let report = executor
        .execute_buffers(&mut stream, &mut plan.tasks, &batch)
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.completed, 2);
    let failure = &report.failures[0];
    assert_eq!(failure.task, TaskId::Buffer(1));
    assert_eq!(failure.range_in_stream, second);
    assert!(matches!(failure.error, LoadError::Io { .. }));
    assert_eq!(plan.tasks[1].kind(), PipelineKind::None);

    let output = final_buffer(&batch);
    assert_eq!(range_bytes(output, ranges[0].unwrap()), buffers[0]);
    assert_eq!(range_bytes(output, ranges[2].unwrap()), buffers[2]);
}

#[test]
fn corrupted_payload_fails_integrity_and_can_be_zeroed() {
    init_logs();
    let good = sample(500, 8);
    let bad = sample(4095, 9);

    let mut builder = PackBuilder::with_level(Level::STORE);
    builder.add_compressed(&good).unwrap();
    builder.add_compressed(&bad).unwrap();
    let (mut data, index) = builder.finish();
    let stored = index.buffer_footprint(1).unwrap().range_in_stream;
    // stored tiles keep the bytes verbatim, so the middle of the stream is payload
    data[(stored.offset + stored.size / 2) as usize] ^= 0x5a;

    let device = SoftDevice::new();
    let mut executor = Executor::new(&device, Backends::cpu_only()).with_options(ExecuteOptions {
        zero_fill_failed: true,
        ..Default::default()
    });
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();

    let mut commands = device.create_command_list().unwrap();
    let size = plan.sizes.get(Category::Final);
    commands.write_buffer(final_buffer(&batch), 0, &vec![0xee; size as usize]);
    device.execute(commands).unwrap();

    let report = executor
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();

    assert!(matches!(
        report.failure(TaskId::Buffer(1)),
        Some(LoadError::Integrity(_))
    ));
    let output = final_buffer(&batch);
    assert_eq!(range_bytes(output, ranges[0].unwrap()), good);
    assert!(range_bytes(output, ranges[1].unwrap()).iter().all(|&b| b == 0));
}

#[test]
fn async_engine_runs_after_the_batch() {
    init_logs();
    let raw = sample(33, 10);
    let packed = sample(90_000, 11);

    let mut builder = PackBuilder::new();
    builder.add_uncompressed(&raw);
    builder.add_compressed(&packed).unwrap();
    let (data, index) = builder.finish();

    let device = SoftDevice::new();
    let mut engine = SoftAsyncEngine::new();
    let mut executor =
        Executor::new(&device, Backends::cpu_only().with_async_engine(&mut engine));
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    assert_eq!(plan.tasks[1].kind(), PipelineKind::DecompressWithAsyncEngine);
    assert_eq!(plan.sizes.get(Category::Staging), 36);

    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();
    let report = executor
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();
    drop(executor);

    assert_eq!(report.deferred, 1);
    assert_eq!(report.completed, 2);
    assert_eq!(device.idle_waits(), 1);
    assert_eq!(engine.submits(), 1);
    assert_eq!(engine.completed(), 1);

    let output = final_buffer(&batch);
    assert_eq!(range_bytes(output, ranges[0].unwrap()), raw);
    assert_eq!(range_bytes(output, ranges[1].unwrap()), packed);
}

#[test]
fn corrupt_async_blob_only_fails_its_task() {
    init_logs();
    let payloads = [sample(5000, 17), sample(300, 18), sample(70_000, 19)];
    let mut builder = PackBuilder::new();
    for p in &payloads {
        builder.add_compressed(p).unwrap();
    }
    let (mut data, index) = builder.finish();
    let broken = index.buffer_footprint(1).unwrap().range_in_stream;
    data[broken.offset as usize] ^= 0xff;

    let device = SoftDevice::new();
    let mut engine = SoftAsyncEngine::new();
    let mut executor =
        Executor::new(&device, Backends::cpu_only().with_async_engine(&mut engine));
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();
    let report = executor
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();
    drop(executor);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].task, TaskId::Buffer(1));
    assert_eq!(report.failures[0].range_in_stream, broken);
    assert!(matches!(report.failures[0].error, LoadError::Codec(_)));
    assert_eq!(report.deferred, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(engine.completed(), 2);
    assert_eq!(plan.tasks[1].kind(), PipelineKind::None);

    let output = final_buffer(&batch);
    assert_eq!(range_bytes(output, ranges[0].unwrap()), payloads[0]);
    assert_eq!(range_bytes(output, ranges[2].unwrap()), payloads[2]);
}

#[test]
fn deferred_tasks_fail_without_an_engine() {
    init_logs();
    let mut builder = PackBuilder::new();
    builder.add_compressed(&sample(100, 12)).unwrap();
    let (data, index) = builder.finish();

    let caps = BackendCaps {
        async_engine: true,
        ..BackendCaps::CPU_ONLY
    };
    let mut plan = plan_buffer_tasks(&index, caps);

    let device = SoftDevice::new();
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();
    let report = Executor::new(&device, Backends::cpu_only())
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();

    assert!(matches!(
        report.failure(TaskId::Buffer(0)),
        Some(LoadError::Backend(BackendError::Unavailable(_)))
    ));
    assert_eq!(report.completed, 0);
}

#[test]
fn resident_buffers_are_copied_directly() {
    init_logs();
    let resident = sample(21, 13);
    let stored = sample(8, 14);

    let mut builder = PackBuilder::new();
    builder.add_resident(resident.clone());
    builder.add_uncompressed(&stored);
    let (data, index) = builder.finish();

    let device = SoftDevice::new();
    let mut executor = Executor::new(&device, Backends::cpu_only());
    let mut plan = plan_buffer_tasks(&index, executor.caps());
    assert_eq!(plan.tasks[0].kind(), PipelineKind::DirectCopy);

    let ranges = final_ranges(&plan.tasks);
    let batch = BufferBatch::create(&device, plan.sizes).unwrap();
    executor
        .execute_buffers(&mut Cursor::new(data), &mut plan.tasks, &batch)
        .unwrap();

    let output = final_buffer(&batch);
    assert_eq!(range_bytes(output, ranges[0].unwrap()), resident);
    assert_eq!(range_bytes(output, ranges[1].unwrap()), stored);
}

#[test]
fn allocation_failure_is_a_batch_error() {
    init_logs();
    let mut builder = PackBuilder::new();
    builder.add_uncompressed(&sample(64, 15));
    let (_, index) = builder.finish();

    let device = SoftDevice::with_memory_limit(96);
    let plan = plan_buffer_tasks(&index, BackendCaps::CPU_ONLY);
    // staging fits, the final buffer does not
    let err = BufferBatch::create(&device, plan.sizes).err().unwrap();
    assert!(err.is_batch_fatal());
    assert!(matches!(
        err,
        LoadError::Allocation {
            name: "Final Buffer",
            size: 64,
            ..
        }
    ));
}

#[rstest]
#[case(1)]
#[case(4)]
#[case(4095)]
#[case(65536)]
fn every_pipeline_reproduces_the_input(#[case] len: usize) {
    init_logs();
    let payload = sample(len, 16);

    let mut builder = PackBuilder::new();
    builder.add_compressed(&payload).unwrap();
    builder.add_uncompressed(&payload);
    let (data, index) = builder.finish();

    let gpu = SoftGpuDecompressor::new();
    for setup in 0..4 {
        let device = SoftDevice::new();
        let mut engine = SoftAsyncEngine::new();
        let backends: Backends<SoftDevice> = match setup {
            1 => Backends::cpu_only().with_gpu(&gpu),
            2 => Backends::cpu_only().with_async_engine(&mut engine),
            _ => Backends::cpu_only(),
        };
        let mut executor = Executor::new(&device, backends).with_options(ExecuteOptions {
            parallel_cpu_decompression: setup == 3,
            ..Default::default()
        });

        let mut plan = plan_buffer_tasks(&index, executor.caps());
        let ranges = final_ranges(&plan.tasks);
        let batch = BufferBatch::create(&device, plan.sizes).unwrap();
        let report = executor
            .execute_buffers(&mut Cursor::new(data.clone()), &mut plan.tasks, &batch)
            .unwrap();

        assert!(report.is_complete(), "setup {setup}: {:?}", report.failures);
        for range in &ranges {
            assert_eq!(range_bytes(final_buffer(&batch), range.unwrap()), payload);
        }
    }
}
