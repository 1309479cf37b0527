pub mod event_manager;
pub mod help;
pub mod ledger_store;
pub mod localization;
