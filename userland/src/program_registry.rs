//! Program registry: the in-tree provider behind `spawn_process`.
//!
//! Maps spawn paths to entry points for the programs compiled into this
//! image. The ELF loader for on-disk binaries is an external
//! collaborator wired into the same `exec` seam.

use yula_abi::task::Priority;
use yula_core::services::exec::{Program, register_resolver};

use crate::apps::compositor::compositor_main;
use crate::apps::wm::wm_main;

const PROGRAMS: &[(&[u8], Program)] = &[
    (
        b"/bin/compositor",
        Program { name: "compositor", entry: compositor_main, priority: Priority::Gui },
    ),
    (
        b"/bin/wm",
        Program { name: "wm", entry: wm_main, priority: Priority::Gui },
    ),
];

fn resolve(path: &[u8]) -> Option<Program> {
    PROGRAMS
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, program)| *program)
}

/// Install the registry as the exec resolver. Called once at boot.
pub fn program_registry_init() {
    register_resolver(resolve);
}
