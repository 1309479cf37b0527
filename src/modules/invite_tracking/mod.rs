pub mod commands;
pub mod events;
pub mod ledger;
pub mod stats;
pub mod tracking;

use crate::modules::{Module, ModuleDefinition};

pub const DEFINITION: ModuleDefinition = ModuleDefinition {
    id: "invite_tracking",
    name_key: "module-invite-tracking-name",
    description_key: "module-invite-tracking-description",
};

pub fn module() -> Module {
    Module {
        definition: DEFINITION,
        commands: commands::commands(),
        event_handlers: vec![events::handler as crate::modules::EventHandler],
    }
}
