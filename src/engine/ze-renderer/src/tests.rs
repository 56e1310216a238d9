use crate::pipelines::SHADER_FILES;
use crate::{
    AspectRatioMode, CommonMaterialInfo, FrameOutput, MaterialInstance, MaterialPass,
    MaterialSetup, MeshBuffers, OffscreenTarget, OpaqueRenderPass, OverlayRenderPass,
    PointShadowRenderPass, PresentTarget, RaytracingTlas, Renderer, RendererConfig, RendererMode,
    SpotShadowRenderPass, SubmeshInfo, SunShadowRenderPass, SwapChainTarget, TlasRebuildMode,
    TransparentRenderPass,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use ze_core::maths::{Matrix4f32, Vec3f32};
use ze_gfx::backend::{
    BufferDesc, BufferUsageFlagBits, DeviceError, IndexBufferFormat, MemoryLocation,
    PipelineBindPoint, ResourceState, SwapChainDesc,
};
use ze_gfx::null::{NullCommand, NullDevice, NullDeviceOptions, NullQueueOp};
use ze_gfx::PixelFormat;
use ze_gpu_context::{Buffer, CommandList, ContextConfig, GpuContext};
use ze_shader_system::{HotReloadConfig, PipelineFactory, SHADER_BLOB_EXTENSION};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 180;

struct CountingMaterial {
    id: u32,
    setups: Arc<AtomicUsize>,
}

impl CountingMaterial {
    fn new(id: u32, setups: &Arc<AtomicUsize>) -> Arc<Self> {
        Arc::new(Self {
            id,
            setups: setups.clone(),
        })
    }
}

impl MaterialInstance for CountingMaterial {
    fn setup(&self, _: MaterialPass) -> MaterialSetup {
        let setups = self.setups.clone();
        MaterialSetup::new(self.id, move |_: &mut CommandList, _: &CommonMaterialInfo| {
            setups.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn prepare_for_rendering(&self, _: &mut CommandList) -> Result<(), DeviceError> {
        Ok(())
    }
}

/// Binds the common table in its setup, then a table of its own per draw
struct TableMaterial {
    context: Arc<GpuContext>,
    descriptor_count: u32,
}

impl MaterialInstance for TableMaterial {
    fn setup(&self, _: MaterialPass) -> MaterialSetup {
        MaterialSetup::new(7, |cmd_list: &mut CommandList, info: &CommonMaterialInfo| {
            cmd_list.set_root_descriptor_table(PipelineBindPoint::Graphics, 3, info.frame_resources);
        })
    }

    fn prepare_for_rendering(&self, cmd_list: &mut CommandList) -> Result<(), DeviceError> {
        let range = self
            .context
            .allocate_contiguous_descriptor_range(self.descriptor_count)?;
        cmd_list.set_descriptor_heaps(&[range.heap()]);
        cmd_list.set_root_descriptor_table(PipelineBindPoint::Graphics, 4, range.gpu_handle(0));
        Ok(())
    }
}

struct Mesh {
    vertices: Buffer,
    indices: Buffer,
}

impl Mesh {
    fn new(context: &GpuContext) -> Self {
        let buffer = |usage, element_size, name| {
            context
                .create_buffer(
                    &BufferDesc {
                        size_bytes: 4096,
                        usage,
                        memory_location: MemoryLocation::GpuOnly,
                        default_resource_state: ResourceState::VertexAndConstantBufferRead,
                    },
                    element_size,
                    name,
                )
                .unwrap()
        };

        Self {
            vertices: buffer(BufferUsageFlagBits::VertexBuffer.into(), 12, "Vertices"),
            indices: buffer(BufferUsageFlagBits::IndexBuffer.into(), 2, "Indices"),
        }
    }

    fn buffers(&self) -> MeshBuffers {
        MeshBuffers {
            positions: self.vertices.vertex_buffer_view(0, 4096),
            others: None,
            index_buffer: self.indices.index_buffer_view(IndexBufferFormat::Uint16),
        }
    }

    fn submesh() -> SubmeshInfo {
        SubmeshInfo {
            first_triangle: 0,
            num_triangles: 12,
            base_vertex: 0,
            num_vertices: 24,
        }
    }
}

struct Fixture {
    _dir: TempDir,
    device: Arc<NullDevice>,
    context: Arc<GpuContext>,
    factory: Arc<PipelineFactory>,
    renderer: Renderer,
    frame_id: u64,
}

impl Fixture {
    fn new() -> Self {
        Self::with(NullDeviceOptions::default(), RendererConfig::default())
    }

    fn with(options: NullDeviceOptions, config: RendererConfig) -> Self {
        Self::with_context(options, config, ContextConfig::default())
    }

    fn with_context(
        options: NullDeviceOptions,
        config: RendererConfig,
        context_config: ContextConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for file in SHADER_FILES {
            std::fs::write(blob_path(dir.path(), file), file.as_bytes()).unwrap();
        }

        let device = Arc::new(NullDevice::with_options(options));
        let context = GpuContext::new(device.clone(), context_config).unwrap();
        let factory = Arc::new(PipelineFactory::new(
            device.clone(),
            context.graveyard().clone(),
            dir.path(),
            HotReloadConfig {
                enabled: false,
                ..Default::default()
            },
        ));

        let mut renderer = Renderer::new(context.clone(), factory.clone(), config).unwrap();
        renderer.initialize(WIDTH, HEIGHT).unwrap();

        Self {
            _dir: dir,
            device,
            context,
            factory,
            renderer,
            frame_id: 0,
        }
    }

    fn frame_sized(
        &mut self,
        width: u32,
        height: u32,
        output: &FrameOutput,
        submit: impl FnOnce(&mut Renderer),
    ) -> u64 {
        self.context.wait_for_buffered_frame(self.frame_id).unwrap();
        self.context.new_frame(self.frame_id);

        self.renderer.begin_frame_common();
        self.renderer.begin_frame(width, height).unwrap();
        submit(&mut self.renderer);
        self.renderer.end_frame_common().unwrap();
        let fence = self.renderer.end_frame(output).unwrap();
        output.target.present().unwrap();

        self.context.set_buffered_frame_fence(fence);
        self.frame_id += 1;
        fence
    }

    fn frame(&mut self, output: &FrameOutput, submit: impl FnOnce(&mut Renderer)) -> u64 {
        self.frame_sized(WIDTH, HEIGHT, output, submit)
    }

    fn offscreen_target(&self) -> OffscreenTarget {
        OffscreenTarget::new(&self.context, WIDTH, HEIGHT, PixelFormat::R8G8B8A8Unorm).unwrap()
    }

    /// Commands of the last list executed on the render queue
    fn last_frame_commands(&self) -> Vec<NullCommand> {
        self.device
            .queue_log(self.context.render_queue().native())
            .into_iter()
            .rev()
            .find_map(|op| match op {
                NullQueueOp::Execute(commands) => Some(commands),
                _ => None,
            })
            .unwrap()
    }

    fn assert_valid(&self) {
        assert_eq!(self.device.take_validation_errors(), Vec::<String>::new());
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = self.context.quit();
    }
}

fn blob_path(dir: &Path, file: &str) -> std::path::PathBuf {
    dir.join(format!("{}.{}", file, SHADER_BLOB_EXTENSION))
}

fn event_names(commands: &[NullCommand]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|command| match command {
            NullCommand::BeginEvent(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn assert_in_order(events: &[String], expected: &[&str]) {
    let mut position = 0;
    for name in expected {
        match events[position..].iter().position(|event| event == name) {
            Some(offset) => position += offset + 1,
            None => panic!("\"{}\" missing or out of order in {:?}", name, events),
        }
    }
}

fn submit_scene(renderer: &mut Renderer, mesh: &Mesh, material: &Arc<CountingMaterial>) {
    let mut opaque = OpaqueRenderPass::new();
    opaque.render_static_object(
        mesh.buffers(),
        Mesh::submesh(),
        material,
        Matrix4f32::IDENTITY,
        1,
        false,
    );
    opaque.render_dynamic_object(
        mesh.buffers(),
        Mesh::submesh(),
        material,
        Matrix4f32::translation(Vec3f32::new(1.0, 0.0, 0.0)),
        Matrix4f32::IDENTITY,
        2,
        true,
    );
    renderer.submit_opaque_pass(opaque);

    let mut transparent = TransparentRenderPass::new();
    transparent.render_object(
        mesh.buffers(),
        Mesh::submesh(),
        material,
        Matrix4f32::IDENTITY,
        false,
    );
    renderer.submit_transparent_pass(transparent);

    let mut overlay = OverlayRenderPass::new();
    overlay.render_object(
        mesh.buffers(),
        Mesh::submesh(),
        material,
        Matrix4f32::IDENTITY,
        true,
        false,
    );
    renderer.submit_overlay_pass(overlay);

    let atlas = renderer.shadow_atlas();
    let cascades = atlas.allocate_sun_cascades(2);
    let spot = atlas.allocate_spot_lights(1);
    let point = atlas.allocate_point_lights(1);

    let mut sun = SunShadowRenderPass::new();
    sun.num_cascades = 2;
    sun.viewports[..2].copy_from_slice(&cascades);
    sun.render_object(1, mesh.buffers(), Mesh::submesh(), Matrix4f32::IDENTITY);
    renderer.submit_sun_shadow_pass(sun);

    let mut spot_pass = SpotShadowRenderPass::new();
    spot_pass.viewport = spot[0];
    spot_pass.render_object(mesh.buffers(), Mesh::submesh(), Matrix4f32::IDENTITY);
    renderer.submit_spot_shadow_pass(spot_pass);

    let mut point_pass = PointShadowRenderPass::new();
    point_pass.viewports = point[0];
    point_pass.max_distance = 10.0;
    point_pass.render_object(mesh.buffers(), Mesh::submesh(), Matrix4f32::IDENTITY);
    renderer.submit_point_shadow_pass(point_pass);
}

#[test]
fn every_renderer_blob_is_loaded() {
    let fixture = Fixture::new();
    assert_eq!(fixture.factory.blob_count(), SHADER_FILES.len());
    assert_eq!(fixture.factory.dirty_count(), 0);
}

#[test]
fn empty_frames_are_valid() {
    let mut fixture = Fixture::new();
    let target = fixture.offscreen_target();
    for _ in 0..4 {
        fixture.frame(&FrameOutput::new(&target), |_| {});
    }

    fixture.assert_valid();
    assert_eq!(target.texture().state(), ResourceState::ShaderRead);
}

#[test]
fn full_scene_runs_every_stage_in_order() {
    let mut fixture = Fixture::new();
    let target = fixture.offscreen_target();
    let mesh = Mesh::new(&fixture.context);
    let setups = Arc::new(AtomicUsize::new(0));
    let material = CountingMaterial::new(1, &setups);

    for _ in 0..3 {
        fixture.frame(&FrameOutput::new(&target), |renderer| {
            submit_scene(renderer, &mesh, &material)
        });
    }
    fixture.assert_valid();

    let commands = fixture.last_frame_commands();
    assert_in_order(
        &event_names(&commands),
        &[
            "Depth Pre-Pass",
            "Light Culling",
            "Linear Depth Pyramid",
            "Shadow Maps",
            "Sky",
            "Opaque",
            "Reflections",
            "Transparent",
            "Post Processing",
            "Overlay",
            "Outline Stencil",
            "Outline",
            "Present",
        ],
    );
    assert!(commands.contains(&NullCommand::SetStencilRef(1)));

    let stats = fixture.renderer.last_frame_stats();
    assert!(!stats.path_traced);
    assert_eq!(stats.draw_calls, 4);
    assert_eq!(stats.shadow_passes, 3);
}

#[test]
fn tiled_frusta_are_only_computed_when_the_tiles_change() {
    let mut fixture = Fixture::new();
    let target = fixture.offscreen_target();

    fixture.frame(&FrameOutput::new(&target), |_| {});
    assert!(event_names(&fixture.last_frame_commands())
        .contains(&"World Space Tiled Frusta".to_string()));

    fixture.frame(&FrameOutput::new(&target), |_| {});
    assert!(!event_names(&fixture.last_frame_commands())
        .contains(&"World Space Tiled Frusta".to_string()));

    fixture.frame_sized(WIDTH * 2, HEIGHT, &FrameOutput::new(&target), |_| {});
    assert!(event_names(&fixture.last_frame_commands())
        .contains(&"World Space Tiled Frusta".to_string()));
    fixture.assert_valid();
}

#[test]
fn consecutive_draws_share_material_setups() {
    let mut fixture = Fixture::new();
    let target = fixture.offscreen_target();
    let mesh = Mesh::new(&fixture.context);
    let setups = Arc::new(AtomicUsize::new(0));
    let first = CountingMaterial::new(1, &setups);
    let second = CountingMaterial::new(2, &setups);

    fixture.frame(&FrameOutput::new(&target), |renderer| {
        let mut opaque = OpaqueRenderPass::new();
        for material in [&first, &first, &second, &second, &first] {
            opaque.render_static_object(
                mesh.buffers(),
                Mesh::submesh(),
                material,
                Matrix4f32::IDENTITY,
                0,
                false,
            );
        }
        renderer.submit_opaque_pass(opaque);
    });

    assert_eq!(setups.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.renderer.last_frame_stats().material_setups, 3);
    fixture.assert_valid();
}

#[test]
fn material_tables_spilling_into_a_new_page_keep_the_common_table_bound() {
    let mut fixture = Fixture::with_context(
        NullDeviceOptions::default(),
        RendererConfig::default(),
        ContextConfig {
            frame_descriptor_page_size: 16,
            frame_descriptor_page_count: 256,
            ..Default::default()
        },
    );
    let target = fixture.offscreen_target();
    let mesh = Mesh::new(&fixture.context);
    let material = Arc::new(TableMaterial {
        context: fixture.context.clone(),
        descriptor_count: 8,
    });

    let pages_before = fixture.context.frame_descriptor_allocator().page_count();
    fixture.frame(&FrameOutput::new(&target), |renderer| {
        let mut opaque = OpaqueRenderPass::new();
        for _ in 0..3 {
            opaque.render_static_object(
                mesh.buffers(),
                Mesh::submesh(),
                &material,
                Matrix4f32::IDENTITY,
                0,
                false,
            );
        }
        renderer.submit_opaque_pass(opaque);
    });

    // 12 common descriptors plus 8 per draw cannot fit a 16 descriptor page
    assert!(fixture.context.frame_descriptor_allocator().page_count() > pages_before);
    fixture.assert_valid();
}

#[test]
fn outlines_past_the_first_65536_draws_keep_their_index() {
    let fixture = Fixture::new();
    let mesh = Mesh::new(&fixture.context);
    let setups = Arc::new(AtomicUsize::new(0));
    let material = CountingMaterial::new(1, &setups);

    let mut opaque = OpaqueRenderPass::new();
    for index in 0..70_000u32 {
        opaque.render_static_object(
            mesh.buffers(),
            Mesh::submesh(),
            &material,
            Matrix4f32::IDENTITY,
            0,
            index == 69_999,
        );
    }
    assert_eq!(opaque.geometry().outlined_objects(), &[69_999]);
}

#[test]
#[should_panic(expected = "Opaque pass already submitted")]
fn opaque_pass_can_only_be_submitted_once() {
    let mut fixture = Fixture::new();
    fixture.renderer.begin_frame(WIDTH, HEIGHT).unwrap();
    fixture.renderer.submit_opaque_pass(OpaqueRenderPass::new());
    fixture.renderer.submit_opaque_pass(OpaqueRenderPass::new());
}

#[test]
fn passes_are_forgotten_after_the_frame() {
    let mut fixture = Fixture::new();
    let target = fixture.offscreen_target();

    fixture.frame(&FrameOutput::new(&target), |renderer| {
        renderer.submit_opaque_pass(OpaqueRenderPass::new());
    });
    fixture.frame(&FrameOutput::new(&target), |renderer| {
        renderer.submit_opaque_pass(OpaqueRenderPass::new());
    });
    fixture.assert_valid();
}

#[test]
fn frame_before_initialize_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(NullDevice::new());
    let context = GpuContext::new(device.clone(), ContextConfig::default()).unwrap();
    let factory = Arc::new(PipelineFactory::new(
        device,
        context.graveyard().clone(),
        dir.path(),
        HotReloadConfig::default(),
    ));

    let mut renderer = Renderer::new(context.clone(), factory, RendererConfig::default()).unwrap();
    assert!(matches!(
        renderer.begin_frame(WIDTH, HEIGHT),
        Err(crate::RendererError::NotInitialized)
    ));
    context.quit().unwrap();
}

#[test]
fn swap_chain_back_buffers_are_presented_in_order() {
    let mut fixture = Fixture::new();
    let mut target = SwapChainTarget::new(
        fixture.context.clone(),
        &SwapChainDesc {
            width: WIDTH,
            height: HEIGHT,
            format: PixelFormat::R8G8B8A8Unorm,
            buffer_count: 3,
        },
        None,
    )
    .unwrap();

    for _ in 0..4 {
        fixture.frame(&FrameOutput::new(&target), |_| {});
    }

    target.resize(WIDTH * 2, HEIGHT * 2).unwrap();
    assert_eq!(target.desc().map(|desc| desc.width), Some(WIDTH * 2));
    for _ in 0..2 {
        fixture.frame_sized(WIDTH * 2, HEIGHT * 2, &FrameOutput::new(&target), |_| {});
    }
    fixture.assert_valid();
}

#[test]
fn fixed_aspect_ratio_letterboxes_the_output() {
    let mut fixture = Fixture::new();
    fixture.renderer.settings_mut().aspect_ratio = AspectRatioMode::Fix16By9;
    let target =
        OffscreenTarget::new(&fixture.context, 400, 400, PixelFormat::R8G8B8A8Unorm).unwrap();

    fixture.frame(&FrameOutput::new(&target), |_| {});

    let commands = fixture.last_frame_commands();
    let present = commands
        .iter()
        .position(|command| *command == NullCommand::BeginEvent("Present".to_string()))
        .unwrap();
    let viewport = commands[present..]
        .iter()
        .find_map(|command| match command {
            NullCommand::SetViewports(viewports) => Some(viewports[0]),
            _ => None,
        })
        .unwrap();

    assert_eq!(viewport.size.x, 400.0);
    assert_eq!(viewport.size.y, 225.0);
    assert_eq!(viewport.position.y, 87.0);
    fixture.assert_valid();
}

#[test]
fn path_tracing_without_raytracing_falls_back_to_rasterization() {
    let mut fixture = Fixture::with(
        NullDeviceOptions {
            raytracing: false,
            ..Default::default()
        },
        RendererConfig {
            mode: RendererMode::Pathtraced,
            ..Default::default()
        },
    );
    assert_eq!(fixture.renderer.effective_mode(), RendererMode::Rasterized);

    let target = fixture.offscreen_target();
    fixture.frame(&FrameOutput::new(&target), |_| {});

    assert!(!fixture.renderer.last_frame_stats().path_traced);
    assert!(event_names(&fixture.last_frame_commands()).contains(&"Opaque".to_string()));
    fixture.assert_valid();
}

#[test]
fn path_traced_frames_wait_for_the_acceleration_structure() {
    let mut fixture = Fixture::with(
        NullDeviceOptions::default(),
        RendererConfig {
            mode: RendererMode::Pathtraced,
            ..Default::default()
        },
    );
    let target = fixture.offscreen_target();
    let mesh = Mesh::new(&fixture.context);

    let mut tlas = RaytracingTlas::new(TlasRebuildMode::Refit);
    tlas.instantiate(mesh.vertices.gpu_address(), &Matrix4f32::IDENTITY, 0);
    fixture.renderer.set_raytracer(tlas);

    for _ in 0..2 {
        fixture.frame(&FrameOutput::new(&target), |_| {});
    }
    fixture.assert_valid();
    assert!(fixture.renderer.last_frame_stats().path_traced);

    let commands = fixture.last_frame_commands();
    assert!(commands
        .iter()
        .any(|command| matches!(command, NullCommand::DispatchRays { width: WIDTH, height: HEIGHT })));
    assert!(!event_names(&commands).contains(&"Opaque".to_string()));

    let render_log = fixture.device.queue_log(fixture.context.render_queue().native());
    let last_execute = render_log
        .iter()
        .rposition(|op| matches!(op, NullQueueOp::Execute(_)))
        .unwrap();
    assert!(matches!(render_log[last_execute - 1], NullQueueOp::Wait { .. }));

    let compute_log = fixture.device.queue_log(fixture.context.compute_queue().native());
    let refits = compute_log
        .iter()
        .filter_map(|op| match op {
            NullQueueOp::Execute(commands) => Some(commands),
            _ => None,
        })
        .flatten()
        .filter_map(|command| match command {
            NullCommand::BuildAccelerationStructure { refit, .. } => Some(*refit),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(refits, vec![false, true]);
}

#[test]
fn skinning_runs_on_the_compute_queue_before_the_frame() {
    let mut fixture = Fixture::new();
    let target = fixture.offscreen_target();
    let mesh = Mesh::new(&fixture.context);

    fixture.frame(&FrameOutput::new(&target), |renderer| {
        let (object, matrices) = renderer.skinning().skin_object(&mesh.vertices, 0, 100, 4);
        assert_eq!(matrices.len(), 4);
        matrices.fill(Matrix4f32::IDENTITY);
        assert_eq!(object.num_vertices, 100);
    });
    fixture.assert_valid();
    assert_eq!(fixture.renderer.skinning().pending_object_count(), 0);

    let compute_log = fixture.device.queue_log(fixture.context.compute_queue().native());
    assert!(compute_log.iter().any(|op| match op {
        NullQueueOp::Execute(commands) => commands
            .iter()
            .any(|command| matches!(command, NullCommand::Dispatch(1, 1, 1))),
        _ => false,
    }));

    let render_log = fixture.device.queue_log(fixture.context.render_queue().native());
    assert!(render_log
        .iter()
        .any(|op| matches!(op, NullQueueOp::Wait { .. })));
}
