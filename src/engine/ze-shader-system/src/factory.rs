use crate::config::HotReloadConfig;
use crate::watcher::ShaderWatcher;
use crate::{PipelineError, SHADER_BLOB_EXTENSION};
use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use ze_core::{ze_error, ze_info, ze_warn};
use ze_gfx::backend::{
    ComputePipelineDesc, Device, GraphicsPipelineDesc, GraphicsPipelineStates, PipelineBindPoint,
    PipelineKind, PipelineShaderStage, PipelineState, RootSignature,
};
use ze_gfx::ShaderStageFlagBits;
use ze_gpu_context::{CommandList, Graveyard};

/// Where the root signature of a reloadable pipeline comes from
#[derive(Clone)]
pub enum RootSignatureSource {
    /// A dedicated root signature blob, shared by every pipeline naming the same file
    FromFile(String),

    /// Embedded in the pipeline's pixel shader, or its first shader when it has none
    FromShader,

    /// Owned by the caller, never reloaded
    User(Arc<RootSignature>),
}

/// Blob names (without extension) per shader stage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphicsPipelineFiles {
    stages: Vec<(ShaderStageFlagBits, String)>,
}

impl GraphicsPipelineFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: ShaderStageFlagBits, file: &str) -> Self {
        assert!(
            self.stages.iter().all(|(existing, _)| *existing != stage),
            "{:?} stage given twice",
            stage
        );
        self.stages.push((stage, file.to_string()));
        self
    }

    pub fn vs(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Vertex, file)
    }

    pub fn ps(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Pixel, file)
    }

    pub fn gs(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Geometry, file)
    }

    pub fn ds(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Domain, file)
    }

    pub fn hs(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Hull, file)
    }

    pub fn ms(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Mesh, file)
    }

    pub fn amplification(self, file: &str) -> Self {
        self.with_stage(ShaderStageFlagBits::Amplification, file)
    }

    pub fn stages(&self) -> &[(ShaderStageFlagBits, String)] {
        &self.stages
    }

    fn embedded_root_signature_file(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|(stage, _)| *stage == ShaderStageFlagBits::Pixel)
            .or_else(|| self.stages.first())
            .map(|(_, file)| file.as_str())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PipelineStatus {
    Declared,
    Pending,
    Built,
    Dirty,
}

pub struct ReloadableRootSignature {
    name: String,
    file: Option<String>,
    root_signature: RwLock<Option<Arc<RootSignature>>>,
}

impl ReloadableRootSignature {
    fn from_file(file: &str) -> Self {
        Self {
            name: format!("Root Signature ({})", file),
            file: Some(file.to_string()),
            root_signature: RwLock::new(None),
        }
    }

    fn from_user(root_signature: Arc<RootSignature>) -> Self {
        Self {
            name: "User Root Signature".to_string(),
            file: None,
            root_signature: RwLock::new(Some(root_signature)),
        }
    }

    /// The live root signature. Panics if it was never built
    pub fn get(&self) -> Arc<RootSignature> {
        self.root_signature
            .read()
            .clone()
            .unwrap_or_else(|| panic!("{} used before being built", self.name))
    }

    pub fn is_built(&self) -> bool {
        self.root_signature.read().is_some()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }
}

enum PipelineSource {
    Graphics {
        states: GraphicsPipelineStates,
        files: GraphicsPipelineFiles,
    },
    Compute {
        file: String,
    },
}

/// A pipeline state and the root signature it was created against. They are only ever swapped
/// together
struct BuiltPipeline {
    state: Arc<PipelineState>,
    root_signature: Arc<RootSignature>,
}

pub struct ReloadablePipelineState {
    name: String,
    source: PipelineSource,
    root_signature: Arc<ReloadableRootSignature>,
    pipeline: RwLock<Option<Arc<BuiltPipeline>>>,
    status: Mutex<PipelineStatus>,
}

impl ReloadablePipelineState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: PipelineStatus) {
        *self.status.lock() = status;
    }

    fn built(&self) -> Arc<BuiltPipeline> {
        self.pipeline
            .read()
            .clone()
            .unwrap_or_else(|| panic!("Pipeline \"{}\" used before being built", self.name))
    }

    /// The live pipeline state. Panics if it was never built
    pub fn get(&self) -> Arc<PipelineState> {
        self.built().state.clone()
    }

    /// Root signature the live pipeline state was created with. It lags behind the shared
    /// [`ReloadableRootSignature`] while a rebuild against a newer one keeps failing
    pub fn root_signature(&self) -> Arc<RootSignature> {
        self.built().root_signature.clone()
    }

    pub fn kind(&self) -> PipelineKind {
        match self.source {
            PipelineSource::Graphics { .. } => PipelineKind::Graphics,
            PipelineSource::Compute { .. } => PipelineKind::Compute,
        }
    }

    pub fn bind_point(&self) -> PipelineBindPoint {
        match self.source {
            PipelineSource::Graphics { .. } => PipelineBindPoint::Graphics,
            PipelineSource::Compute { .. } => PipelineBindPoint::Compute,
        }
    }

    fn files(&self) -> Vec<&str> {
        match &self.source {
            PipelineSource::Graphics { files, .. } => {
                files.stages().iter().map(|(_, file)| file.as_str()).collect()
            }
            PipelineSource::Compute { file } => vec![file.as_str()],
        }
    }
}

/// Handle given out to the renderer. Always resolves to the latest successfully built objects
#[derive(Clone)]
pub struct Pipeline {
    pub state: Arc<ReloadablePipelineState>,
    pub root_signature: Arc<ReloadableRootSignature>,
}

impl Pipeline {
    pub fn pipeline_state(&self) -> Arc<PipelineState> {
        self.state.get()
    }

    pub fn root_signature(&self) -> Arc<RootSignature> {
        self.state.root_signature()
    }

    pub fn bind_point(&self) -> PipelineBindPoint {
        self.state.bind_point()
    }

    /// Set the pipeline state and the root signature it was built with
    pub fn bind(&self, cmd_list: &mut CommandList) {
        let built = self.state.built();
        cmd_list.set_pipeline_state(&built.state);
        cmd_list.set_root_signature(self.bind_point(), &built.root_signature);
    }
}

struct ShaderBlobEntry {
    blob: Option<Arc<Vec<u8>>>,
    used_by_pipelines: Vec<Arc<ReloadablePipelineState>>,
    root_signature: Option<Arc<ReloadableRootSignature>>,
}

#[derive(Default)]
struct ReloadSets {
    pipelines: Vec<Arc<ReloadablePipelineState>>,
    root_signatures: Vec<Arc<ReloadableRootSignature>>,
}

impl ReloadSets {
    fn push_pipeline(&mut self, pipeline: Arc<ReloadablePipelineState>) {
        if !self.pipelines.iter().any(|p| Arc::ptr_eq(p, &pipeline)) {
            self.pipelines.push(pipeline);
        }
    }

    fn push_root_signature(&mut self, root_signature: Arc<ReloadableRootSignature>) {
        if !self
            .root_signatures
            .iter()
            .any(|rs| Arc::ptr_eq(rs, &root_signature))
        {
            self.root_signatures.push(root_signature);
        }
    }

    fn is_empty(&self) -> bool {
        self.pipelines.is_empty() && self.root_signatures.is_empty()
    }
}

pub(crate) struct FactoryShared {
    device: Arc<dyn Device>,
    graveyard: Arc<Graveyard>,
    shader_dir: PathBuf,
    config: HotReloadConfig,
    blobs: Mutex<FnvHashMap<String, ShaderBlobEntry>>,
    dirty: Mutex<ReloadSets>,
    pending: Mutex<ReloadSets>,
}

impl FactoryShared {
    pub(crate) fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub(crate) fn blob_path(&self, name: &str) -> PathBuf {
        self.shader_dir
            .join(format!("{}.{}", name, SHADER_BLOB_EXTENSION))
    }

    pub(crate) fn read_blob(&self, name: &str) -> Result<Vec<u8>, PipelineError> {
        let file = self.blob_path(name);
        std::fs::read(&file).map_err(|error| PipelineError::Io { file, error })
    }

    /// Cached blob, loaded from disk on first use
    fn blob(&self, name: &str) -> Result<Arc<Vec<u8>>, PipelineError> {
        if let Some(blob) = self
            .blobs
            .lock()
            .get(name)
            .and_then(|entry| entry.blob.clone())
        {
            return Ok(blob);
        }

        let blob = Arc::new(self.read_blob(name)?);
        let mut blobs = self.blobs.lock();
        let entry = blobs
            .entry(name.to_string())
            .or_insert_with(|| ShaderBlobEntry {
                blob: None,
                used_by_pipelines: vec![],
                root_signature: None,
            });
        Ok(entry.blob.get_or_insert(blob).clone())
    }

    fn build_root_signature(
        &self,
        root_signature: &ReloadableRootSignature,
    ) -> Result<(), PipelineError> {
        let Some(file) = &root_signature.file else {
            return Ok(());
        };

        let blob = self.blob(file)?;
        let native = self
            .device
            .create_root_signature(&blob, &root_signature.name)
            .map_err(|error| PipelineError::Device {
                name: root_signature.name.clone(),
                error,
            })?;

        let previous = root_signature.root_signature.write().replace(Arc::new(native));
        if let Some(previous) = previous {
            self.graveyard.retire_object(previous);
        }
        Ok(())
    }

    fn build_pipeline(&self, pipeline: &ReloadablePipelineState) -> Result<(), PipelineError> {
        let root_signature = pipeline.root_signature.get();
        let native = match &pipeline.source {
            PipelineSource::Graphics { states, files } => {
                let blobs = files
                    .stages()
                    .iter()
                    .map(|(stage, file)| Ok((*stage, self.blob(file)?)))
                    .collect::<Result<Vec<_>, PipelineError>>()?;
                let shaders = blobs
                    .iter()
                    .map(|(stage, blob)| PipelineShaderStage {
                        stage: *stage,
                        bytecode: blob.as_slice(),
                    })
                    .collect::<Vec<_>>();
                self.device.create_graphics_pipeline(
                    &GraphicsPipelineDesc {
                        root_signature: &root_signature,
                        shaders: &shaders,
                        states,
                    },
                    &pipeline.name,
                )
            }
            PipelineSource::Compute { file } => {
                let blob = self.blob(file)?;
                self.device.create_compute_pipeline(
                    &ComputePipelineDesc {
                        root_signature: &root_signature,
                        bytecode: &blob,
                    },
                    &pipeline.name,
                )
            }
        }
        .map_err(|error| PipelineError::Device {
            name: pipeline.name.clone(),
            error,
        })?;

        let built = Arc::new(BuiltPipeline {
            state: Arc::new(native),
            root_signature,
        });
        let previous = pipeline.pipeline.write().replace(built);
        if let Some(previous) = previous {
            self.graveyard.retire_object(previous);
        }
        pipeline.set_status(PipelineStatus::Built);
        Ok(())
    }

    fn wait_until_unlocked(&self, path: &Path) -> bool {
        for _ in 0..self.config.unlock_max_attempts.max(1) {
            if std::fs::OpenOptions::new().read(true).open(path).is_ok() {
                return true;
            }
            std::thread::sleep(self.config.unlock_poll_interval());
        }
        false
    }

    /// Reload the blob at `path` if a pipeline uses it, and mark its dependents dirty
    pub(crate) fn reload_file(&self, path: &Path) {
        if path.extension().and_then(|ext| ext.to_str()) != Some(SHADER_BLOB_EXTENSION) {
            return;
        }

        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            return;
        };

        if !self.blobs.lock().contains_key(name) {
            return;
        }

        if !self.wait_until_unlocked(path) {
            ze_warn!("\"{}\" stayed locked, ignoring its change", path.display());
            return;
        }

        let blob = match std::fs::read(path) {
            Ok(blob) => blob,
            Err(error) => {
                ze_error!("Failed to reload \"{}\": {}", path.display(), error);
                return;
            }
        };

        ze_info!("Reloading shader blob {}", path.display());
        let (pipelines, root_signature) = {
            let mut blobs = self.blobs.lock();
            let Some(entry) = blobs.get_mut(name) else {
                return;
            };
            entry.blob = Some(Arc::new(blob));
            (entry.used_by_pipelines.clone(), entry.root_signature.clone())
        };

        let mut dirty = self.dirty.lock();
        for pipeline in pipelines {
            let mut status = pipeline.status.lock();
            if matches!(*status, PipelineStatus::Built | PipelineStatus::Dirty) {
                *status = PipelineStatus::Dirty;
                drop(status);
                dirty.push_pipeline(pipeline);
            }
        }

        if let Some(root_signature) = root_signature {
            if root_signature.is_built() {
                dirty.push_root_signature(root_signature);
            }
        }
    }
}

/// Owns every reloadable pipeline and root signature, and the blob cache behind them
pub struct PipelineFactory {
    shared: Arc<FactoryShared>,
    watcher: Mutex<Option<ShaderWatcher>>,
}

impl PipelineFactory {
    pub fn new(
        device: Arc<dyn Device>,
        graveyard: Arc<Graveyard>,
        shader_dir: &Path,
        config: HotReloadConfig,
    ) -> Self {
        Self {
            shared: Arc::new(FactoryShared {
                device,
                graveyard,
                shader_dir: shader_dir.to_path_buf(),
                config,
                blobs: Mutex::default(),
                dirty: Mutex::default(),
                pending: Mutex::default(),
            }),
            watcher: Mutex::new(None),
        }
    }

    pub(crate) fn shared(&self) -> &FactoryShared {
        &self.shared
    }

    pub fn shader_dir(&self) -> &Path {
        &self.shared.shader_dir
    }

    fn root_signature_for_file(
        blobs: &mut FnvHashMap<String, ShaderBlobEntry>,
        pending: &mut ReloadSets,
        file: &str,
    ) -> Arc<ReloadableRootSignature> {
        let entry = blobs
            .entry(file.to_string())
            .or_insert_with(|| ShaderBlobEntry {
                blob: None,
                used_by_pipelines: vec![],
                root_signature: None,
            });

        entry
            .root_signature
            .get_or_insert_with(|| {
                let root_signature = Arc::new(ReloadableRootSignature::from_file(file));
                pending.push_root_signature(root_signature.clone());
                root_signature
            })
            .clone()
    }

    /// Declare a root signature built from its own blob, shared with any pipeline using
    /// [`RootSignatureSource::FromFile`] with the same file
    pub fn create_reloadable_root_signature(&self, file: &str) -> Arc<ReloadableRootSignature> {
        let mut blobs = self.shared.blobs.lock();
        let mut pending = self.shared.pending.lock();
        Self::root_signature_for_file(&mut blobs, &mut pending, file)
    }

    fn declare(
        &self,
        name: String,
        source: PipelineSource,
        root_signature: RootSignatureSource,
        embedded_root_signature_file: Option<&str>,
    ) -> Pipeline {
        let mut blobs = self.shared.blobs.lock();
        let mut pending = self.shared.pending.lock();

        let (root_signature, root_signature_file) = match root_signature {
            RootSignatureSource::User(root_signature) => (
                Arc::new(ReloadableRootSignature::from_user(root_signature)),
                None,
            ),
            RootSignatureSource::FromFile(file) => (
                Self::root_signature_for_file(&mut blobs, &mut pending, &file),
                Some(file),
            ),
            RootSignatureSource::FromShader => {
                let file = embedded_root_signature_file
                    .unwrap_or_else(|| panic!("Pipeline \"{}\" has no shader", name))
                    .to_string();
                (
                    Self::root_signature_for_file(&mut blobs, &mut pending, &file),
                    Some(file),
                )
            }
        };

        let state = Arc::new(ReloadablePipelineState {
            name,
            source,
            root_signature: root_signature.clone(),
            pipeline: RwLock::new(None),
            status: Mutex::new(PipelineStatus::Declared),
        });

        let files = state
            .files()
            .into_iter()
            .map(str::to_string)
            .chain(root_signature_file)
            .collect::<Vec<_>>();
        for file in files {
            let entry = blobs.entry(file).or_insert_with(|| ShaderBlobEntry {
                blob: None,
                used_by_pipelines: vec![],
                root_signature: None,
            });
            if !entry
                .used_by_pipelines
                .iter()
                .any(|pipeline| Arc::ptr_eq(pipeline, &state))
            {
                entry.used_by_pipelines.push(state.clone());
            }
        }

        state.set_status(PipelineStatus::Pending);
        pending.push_pipeline(state.clone());
        Pipeline {
            state,
            root_signature,
        }
    }

    pub fn create_reloadable_graphics_pipeline(
        &self,
        states: GraphicsPipelineStates,
        files: GraphicsPipelineFiles,
        root_signature: RootSignatureSource,
    ) -> Pipeline {
        let name = files
            .stages()
            .iter()
            .map(|(_, file)| file.as_str())
            .collect::<Vec<_>>()
            .join("+");
        let embedded = files.embedded_root_signature_file().map(str::to_string);
        self.declare(
            name,
            PipelineSource::Graphics { states, files },
            root_signature,
            embedded.as_deref(),
        )
    }

    pub fn create_reloadable_compute_pipeline(
        &self,
        file: &str,
        root_signature: RootSignatureSource,
    ) -> Pipeline {
        self.declare(
            file.to_string(),
            PipelineSource::Compute {
                file: file.to_string(),
            },
            root_signature,
            Some(file),
        )
    }

    /// Load every missing blob and build everything declared since the last call.
    /// Starts watching the shader directory the first time it succeeds
    pub fn create_all_pending_reloadable_pipelines(&self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let pending = std::mem::take(&mut *self.shared.pending.lock());

        let missing = self
            .shared
            .blobs
            .lock()
            .iter()
            .filter(|(_, entry)| entry.blob.is_none())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        for name in missing {
            self.shared.blob(&name)?;
        }

        for root_signature in &pending.root_signatures {
            self.shared.build_root_signature(root_signature)?;
        }

        let shared = &*self.shared;
        let results = crossbeam::thread::scope(|scope| {
            let handles = pending
                .pipelines
                .iter()
                .map(|pipeline| scope.spawn(move |_| shared.build_pipeline(pipeline)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join())
                .collect::<Vec<_>>()
        })
        .unwrap_or_else(|_| panic!("Pipeline creation thread panicked"));

        for result in results {
            match result {
                Ok(result) => result?,
                Err(_) => panic!("Pipeline creation thread panicked"),
            }
        }

        ze_info!(
            "Created {} pipelines and {} root signatures in {:?}",
            pending.pipelines.len(),
            pending.root_signatures.len(),
            start.elapsed()
        );

        if self.shared.config.enabled {
            self.start_watcher();
        }
        Ok(())
    }

    fn start_watcher(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return;
        }

        match ShaderWatcher::start(
            Arc::downgrade(&self.shared),
            &self.shared.shader_dir,
            &self.shared.config,
        ) {
            Ok(started) => *watcher = Some(started),
            Err(error) => ze_warn!(
                "Cannot watch \"{}\", shader hot reload disabled: {}",
                self.shared.shader_dir.display(),
                error
            ),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Process a change of `path` right away, the same way the directory watcher does
    pub fn notify_file_changed(&self, path: &Path) {
        self.shared.reload_file(path);
    }

    /// Rebuild whatever changed on disk since the last call. Root signatures are rebuilt first.
    /// A failed rebuild is logged and leaves the previous object live
    pub fn check_for_changed_pipelines(&self) {
        let dirty = std::mem::take(&mut *self.shared.dirty.lock());
        if dirty.is_empty() {
            return;
        }

        let shared = &*self.shared;
        for root_signature in &dirty.root_signatures {
            if let Err(error) = shared.build_root_signature(root_signature) {
                ze_error!(
                    "Hot reload of {} failed, keeping the previous version: {}",
                    root_signature.name,
                    error
                );
            }
        }

        let scope_result = crossbeam::thread::scope(|scope| {
            for pipeline in &dirty.pipelines {
                scope.spawn(move |_| {
                    if let Err(error) = shared.build_pipeline(pipeline) {
                        ze_error!(
                            "Hot reload of \"{}\" failed, keeping the previous version: {}",
                            pipeline.name,
                            error
                        );
                        pipeline.set_status(PipelineStatus::Built);
                    }
                });
            }
        });

        if scope_result.is_err() {
            ze_error!("A pipeline rebuild thread panicked");
        }
    }

    pub fn pipeline_count(&self) -> usize {
        let blobs = self.shared.blobs.lock();
        let mut pipelines: Vec<&Arc<ReloadablePipelineState>> = vec![];
        for entry in blobs.values() {
            for pipeline in &entry.used_by_pipelines {
                if !pipelines.iter().any(|p| Arc::ptr_eq(p, pipeline)) {
                    pipelines.push(pipeline);
                }
            }
        }
        pipelines.len()
    }

    pub fn blob_count(&self) -> usize {
        self.shared.blobs.lock().len()
    }

    /// Number of pipelines using `file`
    pub fn dependent_count(&self, file: &str) -> usize {
        self.shared
            .blobs
            .lock()
            .get(file)
            .map_or(0, |entry| entry.used_by_pipelines.len())
    }

    pub fn dirty_count(&self) -> usize {
        let dirty = self.shared.dirty.lock();
        dirty.pipelines.len() + dirty.root_signatures.len()
    }
}

impl Drop for PipelineFactory {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
    }
}
