use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet},
};

use futures::{
    channel::oneshot,
    future::{self, FutureExt, LocalBoxFuture},
};

use super::{Extent, GeometryId, GraphicsBackend, TargetId};
use crate::{palette::Color, quality::QualityState, Result, VisualsError};

/// One draw submitted to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub geometry: String,
    pub target: TargetId,
}

#[derive(Debug)]
struct TargetRecord {
    label: String,
    extent: Extent,
    quality: Option<QualityState>,
}

#[derive(Debug)]
struct GeometryRecord {
    label: String,
    vertices: usize,
    uniforms: Vec<f32>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    targets: BTreeMap<TargetId, TargetRecord>,
    geometry: BTreeMap<GeometryId, GeometryRecord>,
    draws: Vec<DrawRecord>,
    total_draws: usize,
    composites: Vec<(TargetId, f32)>,
    clear_color: Option<Color>,
    camera_aspect: Option<f32>,
    assets: HashMap<String, Vec<u8>>,
    gated: bool,
    released: HashSet<String>,
    failed: HashMap<String, String>,
    pending: HashMap<String, Vec<oneshot::Sender<Result<Vec<u8>>>>>,
    refuse_allocations: bool,
}

/// Backend that records every call instead of touching a GPU.
///
/// Used by the command line runner and by tests. In gated mode asset loads
/// stay pending until [`HeadlessBackend::release`] or
/// [`HeadlessBackend::fail`] is called for their key, which lets callers
/// decide exactly when a program finishes initialising.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    state: RefCell<HeadlessState>,
}

impl HeadlessBackend {
    /// Backend whose asset loads resolve immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose asset loads wait for an explicit release.
    pub fn gated() -> Self {
        let backend = Self::default();
        backend.state.borrow_mut().gated = true;
        backend
    }

    /// Registers the bytes served for `key`. Unregistered keys serve their
    /// own name as content.
    pub fn with_asset(self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.state.borrow_mut().assets.insert(key.into(), bytes);
        self
    }

    /// Resolves pending and future loads of `key` successfully. Returns how
    /// many pending loads were woken.
    pub fn release(&self, key: &str) -> usize {
        let mut state = self.state.borrow_mut();
        state.released.insert(key.to_string());
        state.failed.remove(key);
        let bytes = asset_bytes(&state, key);
        let waiting = state.pending.remove(key).unwrap_or_default();
        let woken = waiting.len();
        for sender in waiting {
            let _ = sender.send(Ok(bytes.clone()));
        }
        woken
    }

    /// Fails pending and future loads of `key`.
    pub fn fail(&self, key: &str, reason: &str) -> usize {
        let mut state = self.state.borrow_mut();
        state.released.remove(key);
        state.failed.insert(key.to_string(), reason.to_string());
        let waiting = state.pending.remove(key).unwrap_or_default();
        let woken = waiting.len();
        for sender in waiting {
            let _ = sender.send(Err(load_error(key, reason)));
        }
        woken
    }

    pub fn refuse_allocations(&self, refuse: bool) {
        self.state.borrow_mut().refuse_allocations = refuse;
    }

    pub fn pending_loads(&self) -> Vec<String> {
        let state = self.state.borrow();
        let mut keys: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, senders)| senders.iter().any(|sender| !sender.is_canceled()))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn live_targets(&self) -> usize {
        self.state.borrow().targets.len()
    }

    pub fn live_geometry(&self) -> usize {
        self.state.borrow().geometry.len()
    }

    /// Labels of live geometry, in allocation order.
    pub fn geometry_labels(&self) -> Vec<String> {
        self.state
            .borrow()
            .geometry
            .values()
            .map(|record| record.label.clone())
            .collect()
    }

    pub fn geometry_vertices(&self, label: &str) -> Option<usize> {
        self.state
            .borrow()
            .geometry
            .values()
            .find(|record| record.label == label)
            .map(|record| record.vertices)
    }

    pub fn uniforms(&self, label: &str) -> Option<Vec<f32>> {
        self.state
            .borrow()
            .geometry
            .values()
            .find(|record| record.label == label)
            .map(|record| record.uniforms.clone())
    }

    pub fn target_extent(&self, target: TargetId) -> Option<Extent> {
        self.state.borrow().targets.get(&target).map(|record| record.extent)
    }

    pub fn target_label(&self, target: TargetId) -> Option<String> {
        self.state
            .borrow()
            .targets
            .get(&target)
            .map(|record| record.label.clone())
    }

    pub fn target_quality(&self, target: TargetId) -> Option<QualityState> {
        self.state
            .borrow()
            .targets
            .get(&target)
            .and_then(|record| record.quality)
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    /// Draws recorded since construction, including ones already taken.
    pub fn total_draws(&self) -> usize {
        self.state.borrow().total_draws
    }

    pub fn take_draws(&self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.state.borrow_mut().draws)
    }

    /// Number of recorded draws whose geometry label starts with `prefix`.
    pub fn draw_count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .draws
            .iter()
            .filter(|draw| draw.geometry.starts_with(prefix))
            .count()
    }

    pub fn take_composites(&self) -> Vec<(TargetId, f32)> {
        std::mem::take(&mut self.state.borrow_mut().composites)
    }

    pub fn clear_color(&self) -> Option<Color> {
        self.state.borrow().clear_color
    }

    pub fn camera_aspect(&self) -> Option<f32> {
        self.state.borrow().camera_aspect
    }

    fn allocate_id(state: &mut HeadlessState) -> Result<u64> {
        if state.refuse_allocations {
            return Err(VisualsError::backend("allocation refused"));
        }
        state.next_id += 1;
        Ok(state.next_id)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn load_asset(&self, key: &str) -> LocalBoxFuture<'static, Result<Vec<u8>>> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = state.failed.get(key) {
            return future::ready(Err(load_error(key, reason))).boxed_local();
        }
        if !state.gated || state.released.contains(key) {
            return future::ready(Ok(asset_bytes(&state, key))).boxed_local();
        }

        let (sender, receiver) = oneshot::channel();
        state.pending.entry(key.to_string()).or_default().push(sender);
        async move {
            receiver
                .await
                .unwrap_or(Err(VisualsError::Canceled("asset load")))
        }
        .boxed_local()
    }

    fn create_target(&self, label: &str, extent: Extent) -> Result<TargetId> {
        let mut state = self.state.borrow_mut();
        let id = TargetId(Self::allocate_id(&mut state)?);
        state.targets.insert(
            id,
            TargetRecord {
                label: label.to_string(),
                extent,
                quality: None,
            },
        );
        Ok(id)
    }

    fn resize_target(&self, target: TargetId, extent: Extent) {
        if let Some(record) = self.state.borrow_mut().targets.get_mut(&target) {
            record.extent = extent;
        }
    }

    fn configure_target(&self, target: TargetId, quality: &QualityState) {
        if let Some(record) = self.state.borrow_mut().targets.get_mut(&target) {
            record.quality = Some(*quality);
        }
    }

    fn release_target(&self, target: TargetId) {
        self.state.borrow_mut().targets.remove(&target);
    }

    fn create_geometry(&self, label: &str, vertices: usize) -> Result<GeometryId> {
        let mut state = self.state.borrow_mut();
        let id = GeometryId(Self::allocate_id(&mut state)?);
        state.geometry.insert(
            id,
            GeometryRecord {
                label: label.to_string(),
                vertices,
                uniforms: Vec::new(),
            },
        );
        Ok(id)
    }

    fn write_uniforms(&self, geometry: GeometryId, values: &[f32]) {
        if let Some(record) = self.state.borrow_mut().geometry.get_mut(&geometry) {
            record.uniforms.clear();
            record.uniforms.extend_from_slice(values);
        }
    }

    fn release_geometry(&self, geometry: GeometryId) {
        self.state.borrow_mut().geometry.remove(&geometry);
    }

    fn clear_target(&self, _target: TargetId, _color: Color) {}

    fn draw(&self, geometry: GeometryId, target: TargetId) {
        let mut state = self.state.borrow_mut();
        let Some(label) = state.geometry.get(&geometry).map(|record| record.label.clone()) else {
            return;
        };
        state.total_draws += 1;
        state.draws.push(DrawRecord {
            geometry: label,
            target,
        });
    }

    fn composite(&self, target: TargetId, alpha: f32) {
        self.state.borrow_mut().composites.push((target, alpha));
    }

    fn set_clear_color(&self, color: Color) {
        self.state.borrow_mut().clear_color = Some(color);
    }

    fn set_camera_aspect(&self, aspect: f32) {
        self.state.borrow_mut().camera_aspect = Some(aspect);
    }
}

fn asset_bytes(state: &HeadlessState, key: &str) -> Vec<u8> {
    state
        .assets
        .get(key)
        .cloned()
        .unwrap_or_else(|| key.as_bytes().to_vec())
}

fn load_error(key: &str, reason: &str) -> VisualsError {
    VisualsError::backend(format!("loading `{key}` failed: {reason}"))
}
