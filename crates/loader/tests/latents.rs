mod common;

use std::io::Cursor;

use texpack_loader::device::soft::{
    SoftAsyncEngine, SoftDevice, SoftGpuDecompressor, SoftTexture, SoftTextureState,
};
use texpack_loader::*;

use common::*;

/// Every subresource of the latent texture, compressed or not.
fn latent_pack(compress: bool, padding: u32) -> (Vec<u8>, PackIndex) {
    let mut builder = PackBuilder::new();
    builder.set_latent_texture(LATENT_DESC);
    for mip in 0..LATENT_DESC.mip_levels {
        for layer in 0..LATENT_DESC.array_size {
            let latent = latent_data(mip, layer, padding);
            builder
                .add_latent(mip, layer, &latent.rows, latent.row_pitch, compress)
                .unwrap();
        }
    }
    builder.finish()
}

fn assert_loaded(texture: &SoftTexture, first_mip: u32, padding: u32) {
    for mip in first_mip..LATENT_DESC.mip_levels {
        for layer in 0..LATENT_DESC.array_size {
            assert_eq!(
                texture.subresource(mip, layer),
                latent_data(mip, layer, padding).tight,
                "mip {mip} layer {layer}"
            );
        }
    }
    assert!(texture.violations().is_empty(), "{:?}", texture.violations());
}

const WRITE_THEN_FINALIZE: [SoftTextureState; 2] =
    [SoftTextureState::CopyDest, SoftTextureState::ShaderResource];

#[test]
fn uncompressed_latents_respect_row_pitch() {
    init_logs();
    let (data, index) = latent_pack(false, 12);

    let device = SoftDevice::new();
    let texture = device.create_texture(soft_texture_desc());
    let mut executor = Executor::new(&device, Backends::cpu_only());

    let mut plan = LatentPlan::new();
    let slot = plan.add_texture(&index, 0, executor.caps());
    assert!(plan.tasks.iter().all(|t| t.kind() == PipelineKind::ReadUncompressed));
    assert_eq!(plan.sizes().total(), 0);

    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();
    assert!(batch.compressed.is_none() && batch.decompressed.is_none());
    let report = executor
        .execute_latents(&mut Cursor::new(data), &mut plan.tasks, &[&texture], &batch)
        .unwrap();

    assert_eq!(slot, 0);
    assert_eq!(report.completed, 6);
    assert_loaded(&texture, 0, 12);
    assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
}

#[test]
fn gpu_extension_transitions_each_texture_twice() {
    init_logs();
    let (data, index) = latent_pack(true, 0);

    let device = SoftDevice::new();
    let gpu = SoftGpuDecompressor::new();
    let textures = [
        device.create_texture(soft_texture_desc()),
        device.create_texture(soft_texture_desc()),
    ];
    let mut executor = Executor::new(&device, Backends::cpu_only().with_gpu(&gpu));

    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 0, executor.caps());
    plan.add_texture(&index, 1, executor.caps());
    assert_eq!(plan.tasks.len(), 6 + 4);
    assert!(
        plan.tasks
            .iter()
            .all(|t| t.kind() == PipelineKind::DecompressWithGpuExtension)
    );

    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();
    let report = executor
        .execute_latents(
            &mut Cursor::new(data),
            &mut plan.tasks,
            &[&textures[0], &textures[1]],
            &batch,
        )
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(gpu.calls(), 10);
    assert!(device.faults().is_empty(), "{:?}", device.faults());
    assert_loaded(&textures[0], 0, 0);
    assert_loaded(&textures[1], 1, 0);
    // mip 0 of the second texture was never requested
    assert!(textures[1].subresource(0, 0).iter().all(|&b| b == 0));
    for texture in &textures {
        assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
        assert_eq!(texture.state(), SoftTextureState::ShaderResource);
    }
}

#[test]
fn failed_subresource_still_finalizes_texture() {
    init_logs();
    let (data, index) = latent_pack(true, 4);
    let broken = index.latent_footprint(1, 1).unwrap().buffer.range_in_stream;

    let device = SoftDevice::new();
    let texture = device.create_texture(soft_texture_desc());
    let mut executor = Executor::new(&device, Backends::cpu_only());

    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 0, executor.caps());
    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();

    let mut stream = FaultyStream::new(data, broken.offset);
    let report = executor
        .execute_latents(&mut stream, &mut plan.tasks, &[&texture], &batch)
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].task,
        TaskId::Texture {
            slot: 0,
            mip: 1,
            layer: 1
        }
    );
    assert_eq!(report.completed, 5);
    assert!(texture.subresource(1, 1).iter().all(|&b| b == 0));
    assert_eq!(
        texture.subresource(1, 0),
        latent_data(1, 0, 4).tight
    );
    assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
}

#[test]
fn texture_without_loadable_data_is_still_finalized() {
    init_logs();
    let mut builder = PackBuilder::new();
    builder.set_latent_texture(LATENT_DESC);
    let (data, index) = builder.finish();

    let device = SoftDevice::new();
    let texture = device.create_texture(soft_texture_desc());
    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 2, BackendCaps::CPU_ONLY);
    assert!(plan.tasks.iter().all(|t| t.kind() == PipelineKind::None));

    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();
    let report = Executor::new(&device, Backends::cpu_only())
        .execute_latents(&mut Cursor::new(data), &mut plan.tasks, &[&texture], &batch)
        .unwrap();

    assert_eq!(report.skipped, 2);
    assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
}

#[test]
fn async_engine_targets_flat_subresource_index() {
    init_logs();
    let (data, index) = latent_pack(true, 8);

    let device = SoftDevice::new();
    let texture = device.create_texture(soft_texture_desc());
    let mut engine = SoftAsyncEngine::new();
    let mut executor =
        Executor::new(&device, Backends::cpu_only().with_async_engine(&mut engine));

    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 1, executor.caps());
    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();
    let report = executor
        .execute_latents(&mut Cursor::new(data), &mut plan.tasks, &[&texture], &batch)
        .unwrap();
    drop(executor);

    assert_eq!(report.deferred, 4);
    assert_eq!(engine.completed(), 4);
    assert_eq!(device.idle_waits(), 1);
    assert_loaded(&texture, 1, 8);
    assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
}

#[test]
fn corrupt_async_blob_still_finalizes_texture() {
    init_logs();
    let (mut data, index) = latent_pack(true, 4);
    let broken = index.latent_footprint(0, 1).unwrap().buffer.range_in_stream;
    data[broken.offset as usize] ^= 0xff;

    let device = SoftDevice::new();
    let texture = device.create_texture(soft_texture_desc());
    let mut engine = SoftAsyncEngine::new();
    let mut executor =
        Executor::new(&device, Backends::cpu_only().with_async_engine(&mut engine));

    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 0, executor.caps());
    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();
    let report = executor
        .execute_latents(&mut Cursor::new(data), &mut plan.tasks, &[&texture], &batch)
        .unwrap();
    drop(executor);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].task,
        TaskId::Texture {
            slot: 0,
            mip: 0,
            layer: 1
        }
    );
    assert!(matches!(report.failures[0].error, LoadError::Codec(_)));
    assert_eq!(report.deferred, 5);
    assert_eq!(report.completed, 5);
    assert_eq!(engine.completed(), 5);

    assert!(texture.subresource(0, 1).iter().all(|&b| b == 0));
    for (mip, layer) in [(0, 0), (1, 0), (1, 1), (2, 0), (2, 1)] {
        assert_eq!(
            texture.subresource(mip, layer),
            latent_data(mip, layer, 4).tight,
            "mip {mip} layer {layer}"
        );
    }
    assert!(texture.violations().is_empty(), "{:?}", texture.violations());
    assert_eq!(texture.state(), SoftTextureState::ShaderResource);
    assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
}

#[test]
fn zero_fill_clears_failed_subresources() {
    init_logs();
    let (mut data, index) = latent_pack(false, 0);
    // the last subresource in the stream loses all but its first byte
    let cut = index.latent_footprint(2, 1).unwrap().buffer.range_in_stream;
    data.truncate(cut.offset as usize + 1);

    let device = SoftDevice::new();
    let texture = device.create_texture(soft_texture_desc());
    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 0, BackendCaps::CPU_ONLY);
    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();

    let report = Executor::new(&device, Backends::cpu_only())
        .with_options(ExecuteOptions {
            zero_fill_failed: true,
            parallel_cpu_decompression: true,
        })
        .execute_latents(&mut Cursor::new(data), &mut plan.tasks, &[&texture], &batch)
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(texture.subresource(2, 1).iter().all(|&b| b == 0));
    assert_eq!(texture.subresource(2, 0), latent_data(2, 0, 0).tight);
    assert!(texture.violations().is_empty());
    assert_eq!(texture.transitions(), WRITE_THEN_FINALIZE);
}

#[test]
fn missing_texture_slot_is_a_batch_error() {
    init_logs();
    let (data, index) = latent_pack(false, 0);
    let device = SoftDevice::new();
    let mut plan = LatentPlan::new();
    plan.add_texture(&index, 0, BackendCaps::CPU_ONLY);
    let batch = LatentBatch::create(&device, plan.sizes()).unwrap();

    let err = Executor::new(&device, Backends::cpu_only())
        .execute_latents(&mut Cursor::new(data), &mut plan.tasks, &[], &batch)
        .unwrap_err();
    assert!(matches!(err, LoadError::MissingTexture(0)));
}
