pub mod invite_tracking;

use crate::{Data, Error};
use poise::serenity_prelude as serenity;

pub type EventHandler = for<'a> fn(
    &'a serenity::Context,
    &'a serenity::FullEvent,
    &'a Data,
) -> poise::BoxFuture<'a, Result<(), Error>>;

#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    pub id: &'static str,
    pub name_key: &'static str,
    pub description_key: &'static str,
}

pub struct Module {
    pub definition: ModuleDefinition,
    pub commands: Vec<poise::Command<Data, Error>>,
    pub event_handlers: Vec<EventHandler>,
}

pub fn get_modules() -> Vec<Module> {
    vec![invite_tracking::module()]
}

pub fn commands() -> Vec<poise::Command<Data, Error>> {
    let mut all_commands = vec![];

    for mut module in get_modules() {
        let category = module.definition.id;
        for command in &mut module.commands {
            command.category = Some(category.into());
        }
        all_commands.extend(module.commands);
    }

    all_commands.push(crate::services::help::help());
    all_commands
}

/// Every module's event handlers, tagged with the owning module id.
pub fn event_handlers() -> Vec<(&'static str, EventHandler)> {
    get_modules()
        .into_iter()
        .flat_map(|m| {
            let id = m.definition.id;
            m.event_handlers.into_iter().map(move |h| (id, h))
        })
        .collect()
}

pub fn definitions() -> Vec<ModuleDefinition> {
    get_modules().into_iter().map(|m| m.definition).collect()
}
