//! Whole-program containers and the interfaces to external collaborators.
//!
//! A [`Program`] owns every procedure being decompiled, the global address → name
//! map, and the read-only [`Image`]. Procedures are held in [`RefCell`]s: the core
//! is single-threaded (the driver is a depth-first traversal), but preservation
//! proving and argument updates routinely read one procedure while another is being
//! rewritten, so borrows are taken briefly and never held across a recursive step.
//!
//! The [`Frontend`] trait is the boundary to the instruction decoder: the driver
//! asks it to (re-)decode a procedure's statements into basic blocks, and to take a
//! second look when a computed jump is resolved mid-decompilation.

mod globals;
mod image;
mod signature;

pub use globals::{Global, GlobalMap};
pub use image::{Image, Section};
pub use signature::{Parameter, Signature};

use std::cell::{Ref, RefCell, RefMut};

use crate::decompile::Procedure;
use crate::ir::ProcId;
use crate::Result;

/// The interface the call-graph driver uses to (re-)decode procedures.
pub trait Frontend {
    /// Decodes (or re-decodes) the procedure's statements into its control-flow
    /// graph. Called when the driver first visits a procedure and after a
    /// switch-recovery restart.
    ///
    /// # Errors
    ///
    /// Implementations report decoder failures; the driver aborts the procedure.
    fn decode(&self, prog: &Program, pid: ProcId) -> Result<()>;

    /// Attempts to resolve indirect jumps or calls in the procedure using the
    /// current (partially decompiled) state. Returns `true` when new code was
    /// decoded, which invalidates the procedure's analysis so far.
    fn decode_indirect(&self, prog: &Program, pid: ProcId) -> bool {
        let _ = (prog, pid);
        false
    }
}

/// A program under decompilation.
pub struct Program {
    procs: Vec<RefCell<Procedure>>,
    lib_sigs: Vec<Signature>,
    /// Global address → name/type map; mutated only through `global_used` calls.
    pub globals: RefCell<GlobalMap>,
    /// The loaded binary image.
    pub image: Image,
}

impl Program {
    /// Creates an empty program over `image`.
    #[must_use]
    pub fn new(image: Image) -> Self {
        Self {
            procs: Vec::new(),
            lib_sigs: Vec::new(),
            globals: RefCell::new(GlobalMap::new()),
            image,
        }
    }

    /// Registers a new (undecoded) user procedure.
    pub fn add_proc(
        &mut self,
        name: impl Into<String>,
        addr: u64,
        stack_register: u16,
    ) -> ProcId {
        let id = ProcId::new(self.procs.len());
        self.procs
            .push(RefCell::new(Procedure::new(id, name, addr, stack_register)));
        id
    }

    /// Registers a library signature; calls resolve to it by index.
    pub fn add_lib_sig(&mut self, sig: Signature) -> usize {
        self.lib_sigs.push(sig);
        self.lib_sigs.len() - 1
    }

    /// A library signature by index.
    #[must_use]
    pub fn lib_sig(&self, idx: usize) -> &Signature {
        &self.lib_sigs[idx]
    }

    /// Finds a library signature by procedure name.
    #[must_use]
    pub fn find_lib_sig(&self, name: &str) -> Option<usize> {
        self.lib_sigs.iter().position(|s| s.name == name)
    }

    /// Immutable borrow of a procedure.
    ///
    /// # Panics
    ///
    /// Panics if the procedure is currently mutably borrowed; callers must not hold
    /// borrows across operations that may touch the same procedure again.
    #[must_use]
    pub fn proc(&self, id: ProcId) -> Ref<'_, Procedure> {
        self.procs[id.index()].borrow()
    }

    /// Mutable borrow of a procedure. See [`Program::proc`] for the discipline.
    #[must_use]
    pub fn proc_mut(&self, id: ProcId) -> RefMut<'_, Procedure> {
        self.procs[id.index()].borrow_mut()
    }

    /// Number of user procedures.
    #[must_use]
    pub fn proc_count(&self) -> usize {
        self.procs.len()
    }

    /// Iterates procedure ids.
    pub fn proc_ids(&self) -> impl Iterator<Item = ProcId> {
        (0..self.procs.len()).map(ProcId::new)
    }

    /// Finds the procedure whose entry is `addr`.
    #[must_use]
    pub fn find_proc_by_addr(&self, addr: u64) -> Option<ProcId> {
        self.proc_ids().find(|&id| self.proc(id).addr() == addr)
    }
}
