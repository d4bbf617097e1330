mod executor;
mod scheduler;

pub use executor::{
    run_executor, Executor, ExecutorDriver, ExecutorDriverActor, ExecutorDriverOptions,
    ExecutorEvent,
};
pub use scheduler::{
    Scheduler, SchedulerDriver, SchedulerDriverActor, SchedulerDriverOptions, SchedulerEvent,
};
