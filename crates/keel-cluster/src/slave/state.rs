use std::collections::{HashMap, VecDeque};

use crate::id::{FrameworkId, TaskId};
use crate::message::{FrameworkInfo, TaskDescription, TaskInfo, TaskState};
use crate::net::Endpoint;
use crate::resource::Resources;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// The process is launched but has not registered back yet.
    Starting,
    Running,
    /// A kill is in flight; the exit report will clean up.
    ShuttingDown,
}

#[derive(Debug)]
pub struct ExecutorRecord {
    pub state: ExecutorState,
    pub endpoint: Option<Endpoint>,
    /// Opaque description supplied by the isolation module (e.g. a pid).
    pub status: String,
}

/// A task as tracked locally on the slave; the slave is the source of
/// truth for its own tasks. Records are dropped on terminal states.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTask {
    pub task_id: TaskId,
    pub name: String,
    pub resources: Resources,
    pub state: TaskState,
}

/// The slave's mirror of a framework it hosts. The mirror outlives the
/// executor so late messages can still be resolved; only the master's
/// say-so removes it.
#[derive(Debug)]
pub struct SlaveFramework {
    pub info: FrameworkInfo,
    /// Tasks received while the executor is still starting, in arrival
    /// order.
    pub queued_tasks: VecDeque<TaskDescription>,
    pub tasks: HashMap<TaskId, LocalTask>,
    pub executor: Option<ExecutorRecord>,
}

impl SlaveFramework {
    fn new(info: FrameworkInfo) -> Self {
        Self {
            info,
            queued_tasks: VecDeque::new(),
            tasks: HashMap::new(),
            executor: None,
        }
    }

    pub fn held(&self) -> Resources {
        let mut held = Resources::new();
        for task in self.tasks.values() {
            held.add(&task.resources);
        }
        held
    }
}

#[derive(Debug)]
pub struct SlaveState {
    total: Resources,
    frameworks: HashMap<FrameworkId, SlaveFramework>,
}

impl SlaveState {
    pub fn new(total: Resources) -> Self {
        Self {
            total,
            frameworks: HashMap::new(),
        }
    }

    pub fn total(&self) -> &Resources {
        &self.total
    }

    /// Resources held by all non-terminal tasks across frameworks.
    pub fn used(&self) -> Resources {
        let mut used = Resources::new();
        for framework in self.frameworks.values() {
            used.add(&framework.held());
        }
        used
    }

    /// Whether the slave can take on another task of the given size.
    pub fn fits(&self, resources: &Resources) -> bool {
        let mut wanted = self.used();
        wanted.add(resources);
        self.total.contains(&wanted)
    }

    pub fn framework(&self, framework_id: FrameworkId) -> Option<&SlaveFramework> {
        self.frameworks.get(&framework_id)
    }

    pub fn framework_mut(&mut self, framework_id: FrameworkId) -> Option<&mut SlaveFramework> {
        self.frameworks.get_mut(&framework_id)
    }

    pub fn frameworks(&self) -> impl Iterator<Item = (FrameworkId, &SlaveFramework)> {
        self.frameworks.iter().map(|(&id, record)| (id, record))
    }

    pub fn ensure_framework(
        &mut self,
        framework_id: FrameworkId,
        info: &FrameworkInfo,
    ) -> &mut SlaveFramework {
        self.frameworks
            .entry(framework_id)
            .or_insert_with(|| SlaveFramework::new(info.clone()))
    }

    pub fn remove_framework(&mut self, framework_id: FrameworkId) -> Option<SlaveFramework> {
        self.frameworks.remove(&framework_id)
    }

    pub fn add_task(&mut self, framework_id: FrameworkId, task: &TaskDescription) {
        if let Some(framework) = self.frameworks.get_mut(&framework_id) {
            framework.tasks.insert(
                task.task_id,
                LocalTask {
                    task_id: task.task_id,
                    name: task.name.clone(),
                    resources: task.resources.clone(),
                    state: TaskState::Starting,
                },
            );
        }
    }

    /// Apply a state transition to a local task. Terminal transitions
    /// drop the record so the resources count as free immediately.
    /// Returns `false` for unknown tasks.
    pub fn apply_update(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
        state: TaskState,
    ) -> bool {
        let Some(framework) = self.frameworks.get_mut(&framework_id) else {
            return false;
        };
        if state.is_terminal() {
            framework
                .queued_tasks
                .retain(|queued| queued.task_id != task_id);
            return framework.tasks.remove(&task_id).is_some();
        }
        match framework.tasks.get_mut(&task_id) {
            Some(task) => {
                task.state = state;
                true
            }
            None => false,
        }
    }

    /// Pull a task out of the executor launch queue, if it is still there.
    pub fn dequeue_task(
        &mut self,
        framework_id: FrameworkId,
        task_id: TaskId,
    ) -> Option<TaskDescription> {
        let framework = self.frameworks.get_mut(&framework_id)?;
        let position = framework
            .queued_tasks
            .iter()
            .position(|task| task.task_id == task_id)?;
        framework.queued_tasks.remove(position)
    }

    pub fn drain_queue(&mut self, framework_id: FrameworkId) -> Vec<TaskDescription> {
        match self.frameworks.get_mut(&framework_id) {
            Some(framework) => framework.queued_tasks.drain(..).collect(),
            None => vec![],
        }
    }

    /// The full task list, shipped to a new master on re-registration.
    pub fn task_list(&self) -> Vec<TaskInfo> {
        let mut out = vec![];
        for (&framework_id, framework) in self.frameworks.iter() {
            for task in framework.tasks.values() {
                out.push(TaskInfo {
                    framework_id,
                    task_id: task.task_id,
                    name: task.name.clone(),
                    resources: task.resources.clone(),
                    state: task.state,
                });
            }
        }
        out.sort_by_key(|task| (task.framework_id, task.task_id));
        out
    }

    pub fn executor_endpoint(&self, framework_id: FrameworkId) -> Option<&Endpoint> {
        self.frameworks
            .get(&framework_id)?
            .executor
            .as_ref()
            .filter(|executor| executor.state == ExecutorState::Running)?
            .endpoint
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{MintedId, SlaveId};
    use crate::message::ExecutorInfo;
    use std::collections::BTreeMap;

    fn resources(s: &str) -> Resources {
        s.parse().unwrap()
    }

    fn info() -> FrameworkInfo {
        FrameworkInfo {
            name: "analytics".to_string(),
            user: "nobody".to_string(),
            executor: ExecutorInfo {
                uri: "/opt/executor".to_string(),
                data: vec![],
            },
        }
    }

    fn description(task_id: u64, res: &str) -> TaskDescription {
        TaskDescription {
            task_id: task_id.into(),
            slave_id: SlaveId::mint(1, 1),
            name: format!("task-{task_id}"),
            resources: resources(res),
            data: vec![],
            params: BTreeMap::new(),
        }
    }

    #[test]
    fn test_fits_accounts_for_running_tasks() {
        let mut state = SlaveState::new(resources("cpus:4;mem:1024"));
        let framework_id = FrameworkId::mint(1, 1);
        state.ensure_framework(framework_id, &info());
        state.add_task(framework_id, &description(1, "cpus:3;mem:512"));
        assert!(state.fits(&resources("cpus:1;mem:512")));
        assert!(!state.fits(&resources("cpus:2")));
    }

    #[test]
    fn test_terminal_update_frees_resources() {
        let mut state = SlaveState::new(resources("cpus:4;mem:1024"));
        let framework_id = FrameworkId::mint(1, 1);
        state.ensure_framework(framework_id, &info());
        state.add_task(framework_id, &description(1, "cpus:3"));
        assert!(state.apply_update(framework_id, 1.into(), TaskState::Running));
        assert!(state.apply_update(framework_id, 1.into(), TaskState::Finished));
        assert!(state.used().is_empty());
        // The record is gone; a late update is unknown.
        assert!(!state.apply_update(framework_id, 1.into(), TaskState::Killed));
    }

    #[test]
    fn test_queue_preserves_arrival_order() {
        let mut state = SlaveState::new(resources("cpus:4"));
        let framework_id = FrameworkId::mint(1, 1);
        let framework = state.ensure_framework(framework_id, &info());
        framework.queued_tasks.push_back(description(1, "cpus:1"));
        framework.queued_tasks.push_back(description(2, "cpus:1"));
        framework.queued_tasks.push_back(description(3, "cpus:1"));
        assert!(state.dequeue_task(framework_id, 2.into()).is_some());
        let drained = state.drain_queue(framework_id);
        let order = drained
            .iter()
            .map(|task| u64::from(task.task_id))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![1, 3]);
    }
}
