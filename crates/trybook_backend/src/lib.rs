mod env;
mod services;
mod sqlite_store;
#[cfg(test)]
mod test_support;

pub use services::{
    AgentRegistry, EnsureOutcome, PreparedRun, RunOutcome, RunSink, ServiceError, ServiceOptions,
    TrybookService,
};
