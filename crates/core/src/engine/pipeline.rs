use crate::{
    graphics::{Extent, GraphicsBackend, TargetId},
    quality::QualityState,
    Result,
};

/// Engine-owned render target for one program slot. Programs draw into it
/// but never create, resize or release it.
#[derive(Debug)]
pub(crate) struct Pipeline {
    target: TargetId,
    extent: Extent,
}

impl Pipeline {
    pub(crate) fn create(
        gfx: &dyn GraphicsBackend,
        label: &str,
        extent: Extent,
        quality: &QualityState,
    ) -> Result<Self> {
        let target = gfx.create_target(label, extent)?;
        gfx.configure_target(target, quality);
        Ok(Self { target, extent })
    }

    pub(crate) fn target(&self) -> TargetId {
        self.target
    }

    pub(crate) fn extent(&self) -> Extent {
        self.extent
    }

    pub(crate) fn resize(&mut self, gfx: &dyn GraphicsBackend, extent: Extent) {
        if self.extent != extent {
            gfx.resize_target(self.target, extent);
            self.extent = extent;
        }
    }

    pub(crate) fn configure(&self, gfx: &dyn GraphicsBackend, quality: &QualityState) {
        gfx.configure_target(self.target, quality);
    }

    pub(crate) fn release(&self, gfx: &dyn GraphicsBackend) {
        gfx.release_target(self.target);
    }
}
