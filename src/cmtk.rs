use std::marker::PhantomData;

use crate::util::profile_registry::ProfileRegistry;
use crate::vm::VMBinding;

/// A CMTK instance: the process-wide state of the code-object subsystem.
/// A runtime creates one instance (usually during collector
/// initialization, torn down with it) and passes it to the operations in
/// [`crate::code_manager`]. Holding the state in an instance rather than
/// in ambient globals keeps the lifecycle explicit.
pub struct CMTK<VM: VMBinding> {
    pub(crate) profile_registry: ProfileRegistry,
    phantom: PhantomData<VM>,
}

impl<VM: VMBinding> CMTK<VM> {
    pub fn new() -> Self {
        CMTK {
            profile_registry: ProfileRegistry::new(),
            phantom: PhantomData,
        }
    }

    /// The profiling counter registry of this instance.
    pub fn profile_registry(&self) -> &ProfileRegistry {
        &self.profile_registry
    }
}

impl<VM: VMBinding> Default for CMTK<VM> {
    fn default() -> Self {
        Self::new()
    }
}
