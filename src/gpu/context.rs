use std::thread::{self, ThreadId};

use tracing::debug;

use crate::error::RenderError;
use crate::gpu::backend::GpuBackend;

/// The one GPU context of a render pipeline, pinned to the thread that built it.
///
/// Owned by value and passed explicitly; there is no global context.
pub struct RenderContext {
    backend: Box<dyn GpuBackend>,
    owner: ThreadId,
}

impl RenderContext {
    /// Binds `backend` to the current thread.
    pub fn new(backend: Box<dyn GpuBackend>) -> Self {
        let owner = thread::current().id();
        debug!(backend = backend.name(), ?owner, "render context created");
        Self { backend, owner }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Access to GPU operations; fails when called off the owning thread.
    pub fn backend(&mut self) -> Result<&mut dyn GpuBackend, RenderError> {
        if thread::current().id() != self.owner {
            return Err(RenderError::WrongThread);
        }
        Ok(self.backend.as_mut())
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("backend", &self.backend.name())
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::HeadlessBackend;

    #[test]
    fn rejects_calls_from_other_threads() {
        let (backend, _probe) = HeadlessBackend::new();
        let mut ctx = RenderContext::new(Box::new(backend));
        assert!(ctx.backend().is_ok());

        thread::scope(|scope| {
            let ctx = &mut ctx;
            scope
                .spawn(move || {
                    assert!(matches!(ctx.backend(), Err(RenderError::WrongThread)));
                })
                .join()
                .unwrap();
        });
    }
}
