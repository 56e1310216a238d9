use crate::{
    GraphicsPipelineFiles, HotReloadConfig, PipelineError, PipelineFactory, PipelineStatus,
    RaytracingPipelineBuilder, RootSignatureSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use ze_gfx::backend::GraphicsPipelineStates;
use ze_gfx::null::{NullDevice, NullDeviceOptions};
use ze_gpu_context::Graveyard;

struct Fixture {
    dir: TempDir,
    device: Arc<NullDevice>,
    graveyard: Arc<Graveyard>,
    factory: PipelineFactory,
}

impl Fixture {
    fn new(files: &[&str]) -> Self {
        Self::with_device(files, NullDevice::new())
    }

    fn with_device(files: &[&str], device: NullDevice) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(blob_path(dir.path(), file), file.as_bytes()).unwrap();
        }

        let device = Arc::new(device);
        let graveyard = Arc::new(Graveyard::new(2));
        let factory = PipelineFactory::new(
            device.clone(),
            graveyard.clone(),
            dir.path(),
            HotReloadConfig {
                enabled: false,
                ..Default::default()
            },
        );

        Self {
            dir,
            device,
            graveyard,
            factory,
        }
    }

    fn rewrite(&self, file: &str, content: &[u8]) {
        let path = blob_path(self.dir.path(), file);
        std::fs::write(&path, content).unwrap();
        self.factory.notify_file_changed(&path);
    }

    fn drain_graveyard(&self) {
        self.graveyard.new_frame(0);
        self.graveyard.new_frame(1);
    }
}

fn blob_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(format!("{}.cso", file))
}

fn graphics(
    factory: &PipelineFactory,
    vs: &str,
    ps: &str,
    root_signature: RootSignatureSource,
) -> crate::Pipeline {
    factory.create_reloadable_graphics_pipeline(
        GraphicsPipelineStates::default(),
        GraphicsPipelineFiles::new().vs(vs).ps(ps),
        root_signature,
    )
}

#[test]
fn changed_blob_rebuilds_exactly_its_dependents() {
    let fixture = Fixture::new(&["shared_vs", "a_ps", "b_ps", "c_vs", "c_ps", "root"]);
    let factory = &fixture.factory;
    let root = || RootSignatureSource::FromFile("root".to_string());

    let a = graphics(factory, "shared_vs", "a_ps", root());
    let b = graphics(factory, "shared_vs", "b_ps", root());
    let c = graphics(factory, "c_vs", "c_ps", RootSignatureSource::FromShader);
    assert_eq!(a.state.status(), PipelineStatus::Pending);

    factory.create_all_pending_reloadable_pipelines().unwrap();
    assert_eq!(factory.pipeline_count(), 3);
    assert_eq!(factory.dependent_count("shared_vs"), 2);
    let ids = |pipelines: &[&crate::Pipeline]| {
        pipelines
            .iter()
            .map(|pipeline| fixture.device.pipeline_id(&pipeline.pipeline_state()))
            .collect::<Vec<_>>()
    };
    let before = ids(&[&a, &b, &c]);

    fixture.rewrite("shared_vs", b"shared_vs v2");
    assert_eq!(a.state.status(), PipelineStatus::Dirty);
    assert_eq!(b.state.status(), PipelineStatus::Dirty);
    assert_eq!(c.state.status(), PipelineStatus::Built);

    factory.check_for_changed_pipelines();
    let after = ids(&[&a, &b, &c]);
    assert_ne!(before[0], after[0]);
    assert_ne!(before[1], after[1]);
    assert_eq!(before[2], after[2]);
    assert_eq!(a.state.status(), PipelineStatus::Built);
    assert_eq!(factory.dirty_count(), 0);

    // Replaced pipelines wait in the graveyard
    assert_eq!(fixture.graveyard.len(fixture.graveyard.current_frame()), 2);
    assert_eq!(fixture.device.live_pipeline_count(), 5);
    fixture.drain_graveyard();
    assert_eq!(fixture.device.live_pipeline_count(), 3);
}

#[test]
fn failed_rebuild_keeps_the_previous_pipeline() {
    let fixture = Fixture::new(&["depth_vs", "depth_ps"]);
    let pipeline = graphics(
        &fixture.factory,
        "depth_vs",
        "depth_ps",
        RootSignatureSource::FromShader,
    );
    fixture
        .factory
        .create_all_pending_reloadable_pipelines()
        .unwrap();
    let id = fixture.device.pipeline_id(&pipeline.pipeline_state());

    fixture.rewrite("depth_vs", b"");
    fixture.factory.check_for_changed_pipelines();

    assert_eq!(fixture.device.pipeline_id(&pipeline.pipeline_state()), id);
    assert_eq!(pipeline.state.status(), PipelineStatus::Built);
    assert_eq!(fixture.device.live_pipeline_count(), 1);

    // Fixing the file brings the pipeline back to life
    fixture.rewrite("depth_vs", b"depth_vs fixed");
    fixture.factory.check_for_changed_pipelines();
    assert_ne!(fixture.device.pipeline_id(&pipeline.pipeline_state()), id);
}

#[test]
fn missing_blob_fails_startup() {
    let fixture = Fixture::new(&[]);
    fixture
        .factory
        .create_reloadable_compute_pipeline("missing_cs", RootSignatureSource::FromShader);

    match fixture.factory.create_all_pending_reloadable_pipelines() {
        Err(PipelineError::Io { file, .. }) => assert!(file.ends_with("missing_cs.cso")),
        _ => panic!("a missing blob must fail"),
    }
}

#[test]
fn changed_root_signature_rebuilds_its_pipelines() {
    let fixture = Fixture::new(&["lighting_cs", "tonemap_cs", "compute_root"]);
    let factory = &fixture.factory;
    let lighting = factory.create_reloadable_compute_pipeline(
        "lighting_cs",
        RootSignatureSource::FromFile("compute_root".to_string()),
    );
    let tonemap = factory.create_reloadable_compute_pipeline(
        "tonemap_cs",
        RootSignatureSource::FromFile("compute_root".to_string()),
    );
    assert!(Arc::ptr_eq(&lighting.root_signature, &tonemap.root_signature));
    factory.create_all_pending_reloadable_pipelines().unwrap();
    assert_eq!(fixture.device.live_root_signature_count(), 1);

    let root_signature = lighting.root_signature();
    let pipeline_id = fixture.device.pipeline_id(&tonemap.pipeline_state());
    fixture.rewrite("compute_root", b"compute_root v2");
    factory.check_for_changed_pipelines();

    assert!(!Arc::ptr_eq(&root_signature, &lighting.root_signature()));
    assert_ne!(
        fixture.device.pipeline_id(&tonemap.pipeline_state()),
        pipeline_id
    );
}

#[test]
fn pipeline_keeps_its_root_signature_while_its_rebuild_fails() {
    let fixture = Fixture::new(&["a_vs", "a_ps", "root"]);
    let pipeline = graphics(
        &fixture.factory,
        "a_vs",
        "a_ps",
        RootSignatureSource::FromFile("root".to_string()),
    );
    fixture
        .factory
        .create_all_pending_reloadable_pipelines()
        .unwrap();
    let old_root_signature = pipeline.root_signature();
    let old_id = fixture.device.pipeline_id(&pipeline.pipeline_state());

    fixture.rewrite("a_ps", b"");
    fixture.factory.check_for_changed_pipelines();
    fixture.rewrite("root", b"root v2");
    fixture.factory.check_for_changed_pipelines();

    // The shared root signature moved on, the pipeline still binds the pair it was built with
    assert!(!Arc::ptr_eq(&pipeline.root_signature.get(), &old_root_signature));
    assert_eq!(fixture.device.pipeline_id(&pipeline.pipeline_state()), old_id);
    assert!(Arc::ptr_eq(&pipeline.root_signature(), &old_root_signature));

    fixture.rewrite("a_ps", b"a_ps fixed");
    fixture.factory.check_for_changed_pipelines();
    assert_ne!(fixture.device.pipeline_id(&pipeline.pipeline_state()), old_id);
    assert!(Arc::ptr_eq(
        &pipeline.root_signature(),
        &pipeline.root_signature.get()
    ));
}

#[test]
fn unrelated_files_are_ignored() {
    let fixture = Fixture::new(&["blit_vs", "blit_ps", "unused"]);
    graphics(
        &fixture.factory,
        "blit_vs",
        "blit_ps",
        RootSignatureSource::FromShader,
    );
    fixture
        .factory
        .create_all_pending_reloadable_pipelines()
        .unwrap();

    fixture.rewrite("unused", b"unused v2");
    let text_file = fixture.dir.path().join("blit_vs.hlsl");
    std::fs::write(&text_file, "float4 main() : SV_Position { return 0; }").unwrap();
    fixture.factory.notify_file_changed(&text_file);

    assert_eq!(fixture.factory.dirty_count(), 0);
}

#[test]
fn embedded_root_signature_comes_from_the_pixel_shader() {
    let files = GraphicsPipelineFiles::new().vs("gbuffer_vs").ps("gbuffer_ps");
    assert_eq!(files.stages().len(), 2);

    let fixture = Fixture::new(&["gbuffer_vs", "gbuffer_ps"]);
    let pipeline = fixture.factory.create_reloadable_graphics_pipeline(
        GraphicsPipelineStates::default(),
        files,
        RootSignatureSource::FromShader,
    );
    assert_eq!(pipeline.root_signature.file(), Some("gbuffer_ps"));
}

#[test]
fn raytracing_pipeline_exposes_every_identifier() {
    let fixture = Fixture::with_device(
        &["path_tracer_lib"],
        NullDevice::with_options(NullDeviceOptions {
            raytracing: true,
            ..Default::default()
        }),
    );

    let builder = RaytracingPipelineBuilder::new("path_tracer_lib", "RayGen")
        .hit_group("PrimaryHitGroup", "Miss", Some("ClosestHit"), None)
        .hit_group("ShadowHitGroup", "Miss", None, Some("ShadowAnyHit"))
        .max_payload_size(32)
        .max_recursion_depth(2);
    let pipeline = fixture.factory.create_raytracing_pipeline(&builder).unwrap();

    assert_eq!(pipeline.hit_group_identifiers.len(), 2);
    assert_eq!(pipeline.miss_identifiers.len(), 2);
    assert_eq!(pipeline.miss_identifiers[0], pipeline.miss_identifiers[1]);
    assert_ne!(
        pipeline.hit_group_identifiers[0],
        pipeline.hit_group_identifiers[1]
    );
}

#[test]
#[should_panic]
fn too_many_hit_groups_panics() {
    let mut builder = RaytracingPipelineBuilder::new("lib", "RayGen");
    for i in 0..=crate::MAX_HIT_GROUPS {
        builder = builder.hit_group(&format!("HitGroup{}", i), "Miss", None, None);
    }
}
