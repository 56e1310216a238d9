use crate::{BarrierResource, ContextConfig, GpuContext};
use std::collections::BTreeSet;
use std::sync::Arc;
use ze_gfx::backend::*;
use ze_gfx::null::{NullCommand, NullDevice, NullDeviceOptions, NullQueueOp};
use ze_gfx::PixelFormat;

fn auto_context() -> (Arc<NullDevice>, Arc<GpuContext>) {
    let device = Arc::new(NullDevice::new());
    let context = GpuContext::new(device.clone(), ContextConfig::default()).unwrap();
    (device, context)
}

fn manual_context(config: ContextConfig) -> (Arc<NullDevice>, Arc<GpuContext>) {
    let device = Arc::new(NullDevice::with_options(NullDeviceOptions {
        manual_gpu: true,
        ..Default::default()
    }));
    let context = GpuContext::new(device.clone(), config).unwrap();
    (device, context)
}

/// Quitting flushes, so the GPU has to keep making progress meanwhile
fn quit_manual(device: &NullDevice, context: &Arc<GpuContext>) {
    let handle = {
        let context = context.clone();
        std::thread::spawn(move || context.quit())
    };

    while !handle.is_finished() {
        device.complete_all_work();
        std::thread::yield_now();
    }
    handle.join().unwrap().unwrap();
}

fn sampled_texture_desc() -> TextureDesc {
    TextureDesc::new_2d(
        128,
        128,
        PixelFormat::R8G8B8A8Unorm,
        TextureUsageFlagBits::ShaderResource.into(),
    )
}

fn plain_buffer_desc() -> BufferDesc {
    BufferDesc {
        size_bytes: 256,
        usage: BufferUsageFlags::default(),
        memory_location: MemoryLocation::GpuOnly,
        default_resource_state: ResourceState::Common,
    }
}

#[test]
fn concurrent_signals_are_unique_and_gapless() {
    const THREADS: u64 = 8;
    const SIGNALS: u64 = 100;

    let (device, context) = auto_context();
    let handles = (0..THREADS)
        .map(|_| {
            let context = context.clone();
            std::thread::spawn(move || {
                (0..SIGNALS)
                    .map(|_| context.render_queue().signal().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    let values = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect::<BTreeSet<_>>();
    assert_eq!(values, (1..=THREADS * SIGNALS).collect::<BTreeSet<_>>());

    // Native signals reached the queue in value order
    let signaled = device
        .queue_log(context.render_queue().native())
        .into_iter()
        .filter_map(|op| match op {
            NullQueueOp::Signal { value, .. } => Some(value),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert!(signaled.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn command_lists_come_back_clean() {
    let (device, context) = auto_context();

    for _ in 0..10 {
        let mut cmd_list = context.get_free_render_command_list().unwrap();
        assert_eq!(
            device.commands(cmd_list.native()),
            vec![NullCommand::SetScissors(vec![ze_core::maths::RectI32::new(
                0,
                0,
                i32::MAX,
                i32::MAX
            )])]
        );
        cmd_list.draw(3, 1, 0, 0);
        context.execute(cmd_list).unwrap();
        context.render_queue().flush().unwrap();
    }

    assert_eq!(device.created_command_list_count(), 1);
    assert_eq!(device.created_command_allocator_count(), 1);
    assert_eq!(context.render_queue().free_command_list_count(), 1);
    assert!(device.validation_errors().is_empty());
}

#[test]
fn compute_list_selection_follows_async_flag() {
    let (_device, context) = auto_context();
    assert_eq!(
        context
            .get_free_compute_command_list(true)
            .unwrap()
            .queue_type(),
        QueueType::Compute
    );
    assert_eq!(
        context
            .get_free_compute_command_list(false)
            .unwrap()
            .queue_type(),
        QueueType::Graphics
    );
    assert_eq!(
        context.get_free_copy_command_list().unwrap().queue_type(),
        QueueType::Transfer
    );
}

#[test]
fn flush_reclaims_everything() {
    let (_device, context) = auto_context();
    for _ in 0..5 {
        let mut cmd_list = context.get_free_compute_command_list(true).unwrap();
        cmd_list.dispatch(1, 1, 1);
        context.execute(cmd_list).unwrap();
    }

    context.flush_application().unwrap();
    let queue = context.compute_queue();
    assert_eq!(queue.running_count(), 0);
    assert!(queue.free_command_list_count() >= 1);
    assert!(queue.is_fence_complete(queue.last_signaled_value()));
}

#[test]
fn batched_barriers_are_never_dropped() {
    let (device, context) = auto_context();
    let buffers = (0..40)
        .map(|i| {
            context
                .create_buffer(&plain_buffer_desc(), 0, &format!("Buffer {}", i))
                .unwrap()
        })
        .collect::<Vec<_>>();

    let mut cmd_list = context.get_free_render_command_list().unwrap();
    {
        let mut batch = cmd_list.barriers();
        for buffer in &buffers {
            batch.transition(buffer, ResourceState::Common, ResourceState::CopyWrite);
        }
        batch.transition(&buffers[0], ResourceState::CopyWrite, ResourceState::CopyWrite);
    }

    let batch_sizes = device
        .commands(cmd_list.native())
        .into_iter()
        .filter_map(|command| match command {
            NullCommand::Barrier(barriers) => Some(barriers.len()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(batch_sizes, vec![16, 16, 8]);

    context.execute(cmd_list).unwrap();
    assert!(device.validation_errors().is_empty());
    for buffer in &buffers {
        let id = device.resource_id(buffer.resource_ref());
        assert_eq!(device.resource_state(id), Some(ResourceState::CopyWrite));
    }
}

#[test]
fn dynamic_constants_are_aligned() {
    let (_device, context) = auto_context();
    context.new_frame(0);
    let mut cmd_list = context.get_free_render_command_list().unwrap();
    for size in [4u64, 100, 300] {
        let address = cmd_list
            .upload_dynamic_constant_buffer(&vec![0u8; size as usize])
            .unwrap();
        assert_eq!(address % 256, 0);
    }
    let address = context.upload_dynamic_constant_buffer(&[1, 2, 3]).unwrap();
    assert_eq!(address % 256, 0);
}

#[test]
fn other_queue_wait_is_recorded_on_the_gpu() {
    let (device, context) = manual_context(ContextConfig::default());

    let mut cmd_list = context.get_free_compute_command_list(true).unwrap();
    cmd_list.dispatch(4, 1, 1);
    let compute_value = context.execute(cmd_list).unwrap();

    context
        .render_queue()
        .wait_for_other_queue(context.compute_queue())
        .unwrap();
    let render_value = context.render_queue().signal().unwrap();

    let log = device.queue_log(context.render_queue().native());
    assert_eq!(
        log[0],
        NullQueueOp::Wait {
            fence: device.fence_id(context.compute_queue().fence()),
            value: compute_value + 1,
        }
    );

    device.complete_queue_work(QueueType::Graphics);
    assert!(!context.render_queue().is_fence_complete(render_value));

    device.complete_all_work();
    assert!(context.render_queue().is_fence_complete(render_value));
    quit_manual(&device, &context);
}

#[test]
fn retired_resources_outlive_their_buffered_frame() {
    let (device, context) = manual_context(ContextConfig {
        buffered_frames: 2,
        ..Default::default()
    });

    let mut retired_id = 0;
    let mut frame_fences = vec![];
    for frame in 0..3u64 {
        if frame == 2 {
            // Nothing ran on the GPU yet, frame 0's texture must still be there
            assert!(!context.render_queue().is_fence_complete(frame_fences[0]));
            assert!(device.is_resource_alive(retired_id));
            device.complete_all_work();
        }

        context.wait_for_buffered_frame(frame).unwrap();
        context.new_frame(frame);

        let mut cmd_list = context.get_free_render_command_list().unwrap();
        if frame == 0 {
            let texture = context
                .create_texture(&sampled_texture_desc(), "Retired")
                .unwrap();
            retired_id = device.resource_id(texture.resource_ref());
            cmd_list.transition_barrier(
                &texture,
                ResourceState::Common,
                ResourceState::PixelShaderRead,
            );
        }
        cmd_list.draw(3, 1, 0, 0);

        let fence = context.execute(cmd_list).unwrap();
        context.set_buffered_frame_fence(fence);
        frame_fences.push(fence);

        if frame == 1 {
            assert!(device.is_resource_alive(retired_id));
        }
    }

    assert!(!device.is_resource_alive(retired_id));
    assert!(device.validation_errors().is_empty());
    quit_manual(&device, &context);
}

#[test]
fn resize_retires_the_previous_texture() {
    let (device, context) = auto_context();
    context.new_frame(0);

    let mut texture = context
        .create_texture(&sampled_texture_desc(), "Resized")
        .unwrap();
    let old_id = device.resource_id(texture.resource_ref());
    let old_srv = texture.srv();

    texture.resize(256, 64).unwrap();
    assert_eq!((texture.width(), texture.height()), (256, 64));
    assert_ne!(device.resource_id(texture.resource_ref()), old_id);
    assert_ne!(texture.srv(), old_srv);
    assert!(device.is_resource_alive(old_id));

    context.new_frame(1);
    context.new_frame(2);
    assert!(!device.is_resource_alive(old_id));
}

#[test]
fn expired_fence_wait_reports_a_lost_device() {
    let (device, context) = manual_context(ContextConfig {
        fence_wait_timeout_ms: Some(10),
        ..Default::default()
    });

    let value = context.render_queue().signal().unwrap();
    assert_eq!(
        context.render_queue().wait_for_fence(value),
        Err(DeviceError::DeviceLost)
    );

    device.complete_all_work();
    assert_eq!(context.render_queue().wait_for_fence(value), Ok(()));
    quit_manual(&device, &context);
}

#[test]
fn quit_runs_once() {
    let (device, context) = auto_context();
    context.new_frame(0);
    let texture = context
        .create_texture(&sampled_texture_desc(), "Leftover")
        .unwrap();
    let id = device.resource_id(texture.resource_ref());
    drop(texture);

    context.quit().unwrap();
    assert!(!device.is_resource_alive(id));
    assert!(!context.is_running());
    context.quit().unwrap();
}

#[test]
#[should_panic]
fn view_without_format_capability_panics() {
    let (_device, context) = auto_context();
    let desc = TextureDesc::new_2d(
        64,
        64,
        PixelFormat::D32Float,
        TextureUsageFlagBits::DepthStencil | TextureUsageFlagBits::UnorderedAccess,
    );
    let _ = context.create_texture(&desc, "Depth");
}

fn index_buffer(context: &GpuContext, size_bytes: u64) -> crate::Buffer {
    context
        .create_buffer(
            &BufferDesc {
                size_bytes,
                usage: BufferUsageFlagBits::IndexBuffer.into(),
                memory_location: MemoryLocation::GpuOnly,
                default_resource_state: ResourceState::IndexBufferRead,
            },
            2,
            "Indices",
        )
        .unwrap()
}

#[test]
fn index_buffer_view_covers_the_whole_buffer() {
    let (_device, context) = auto_context();
    let buffer = index_buffer(&context, 3 * 1024 * 1024);
    let view = buffer.index_buffer_view(IndexBufferFormat::Uint16);
    assert_eq!(view.size_in_bytes, 3 * 1024 * 1024);
    assert_eq!(view.address, buffer.gpu_address());
}

#[test]
#[should_panic(expected = "too large to be bound whole")]
fn index_buffer_past_4_gib_cannot_be_viewed_whole() {
    let (_device, context) = auto_context();
    let buffer = index_buffer(&context, 5 << 30);
    buffer.index_buffer_view(IndexBufferFormat::Uint32);
}
