//! End-to-end scenarios running master, slave, scheduler driver, and
//! in-process executors in one process over real TCP.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use keel_cluster::driver::{
    Executor, ExecutorDriver, Scheduler, SchedulerDriver, SchedulerDriverActor,
    SchedulerDriverOptions,
};
use keel_cluster::election::{ElectionBackend, LeaderEvent};
use keel_cluster::id::{FrameworkId, OfferId, SlaveId, TaskId};
use keel_cluster::isolation::{exit_channel, ExecutorFactory, LocalIsolation};
use keel_cluster::master::{MasterActor, MasterEvent, MasterOptions, MasterSnapshot};
use keel_cluster::message::{
    ExecutorInfo, FrameworkInfo, SlaveOffer, StatusUpdate, TaskDescription, TaskState,
};
use keel_cluster::net::Endpoint;
use keel_cluster::resource::Resources;
use keel_cluster::slave::{SlaveActor, SlaveEvent, SlaveOptions, SlaveSnapshot};
use keel_server::actor::{ActorHandle, ActorSystem};
use keel_server::RetryStrategy;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(10);

fn resources(s: &str) -> Resources {
    s.parse().unwrap()
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn retry() -> RetryStrategy {
    RetryStrategy::Fixed {
        max_count: 5,
        delay: Duration::from_millis(100),
    }
}

fn master_endpoint(port: u16) -> Endpoint {
    Endpoint::new("master", "127.0.0.1", port)
}

fn master_options(port: u16, election: Option<ElectionBackend>) -> MasterOptions {
    MasterOptions {
        listen_host: "127.0.0.1".to_string(),
        port,
        external_host: "127.0.0.1".to_string(),
        allocator: None,
        election,
        reconciliation_window: Duration::from_millis(500),
        slave_heartbeat_timeout: Duration::from_secs(60),
        retry: retry(),
    }
}

#[derive(Clone, Copy)]
enum ExecutorBehavior {
    /// Report running, then finished after the delay.
    FinishAfter(Duration),
    /// Report running and wait for an explicit kill.
    RunUntilKilled,
}

struct TestExecutor {
    behavior: ExecutorBehavior,
}

impl Executor for TestExecutor {
    fn registered(
        &mut self,
        _driver: &ExecutorDriver,
        _framework_id: FrameworkId,
        _slave_id: SlaveId,
        _data: &[u8],
    ) {
    }

    fn launch_task(&mut self, driver: &ExecutorDriver, task: &TaskDescription) {
        driver.send_status_update(task.task_id, TaskState::Running, None);
        if let ExecutorBehavior::FinishAfter(delay) = self.behavior {
            let driver = driver.clone();
            let task_id = task.task_id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                driver.send_status_update(task_id, TaskState::Finished, None);
            });
        }
    }

    fn kill_task(&mut self, driver: &ExecutorDriver, task_id: TaskId) {
        driver.send_status_update(task_id, TaskState::Killed, None);
    }

    fn framework_message(&mut self, driver: &ExecutorDriver, data: &[u8]) {
        // Echo back to the framework.
        driver.send_framework_message(data.to_vec());
    }

    fn shutdown(&mut self, _driver: &ExecutorDriver) {}
}

fn slave_options(
    master: Endpoint,
    election: Option<ElectionBackend>,
    behavior: ExecutorBehavior,
    res: &str,
) -> SlaveOptions {
    let (exits_tx, exits_rx) = exit_channel();
    let factory: ExecutorFactory = Arc::new(move |_| {
        Box::new(TestExecutor { behavior }) as Box<dyn Executor>
    });
    SlaveOptions {
        listen_host: "127.0.0.1".to_string(),
        port: 0,
        external_host: "127.0.0.1".to_string(),
        hostname: "node1".to_string(),
        resources: resources(res),
        work_dir: std::env::temp_dir().join(format!("keel-test-{}", std::process::id())),
        isolation: Arc::new(LocalIsolation::new(exits_tx, factory)),
        executor_exits: Some(exits_rx),
        master,
        election,
        executor_registration_timeout: Duration::from_secs(5),
        kill_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(100),
        retry: retry(),
    }
}

enum SchedulerCallback {
    Registered {
        driver: SchedulerDriver,
        framework_id: FrameworkId,
    },
    Offer {
        driver: SchedulerDriver,
        offer_id: OfferId,
        offers: Vec<SlaveOffer>,
    },
    Status(StatusUpdate),
    Message {
        slave_id: SlaveId,
        data: Vec<u8>,
    },
    Error(String),
}

struct TestScheduler {
    events: mpsc::UnboundedSender<SchedulerCallback>,
}

impl Scheduler for TestScheduler {
    fn registered(&mut self, driver: &SchedulerDriver, framework_id: FrameworkId) {
        let _ = self.events.send(SchedulerCallback::Registered {
            driver: driver.clone(),
            framework_id,
        });
    }

    fn resource_offer(
        &mut self,
        driver: &SchedulerDriver,
        offer_id: OfferId,
        offers: &[SlaveOffer],
    ) {
        let _ = self.events.send(SchedulerCallback::Offer {
            driver: driver.clone(),
            offer_id,
            offers: offers.to_vec(),
        });
    }

    fn status_update(&mut self, _driver: &SchedulerDriver, update: &StatusUpdate) {
        let _ = self.events.send(SchedulerCallback::Status(update.clone()));
    }

    fn framework_message(&mut self, _driver: &SchedulerDriver, slave_id: SlaveId, data: &[u8]) {
        let _ = self.events.send(SchedulerCallback::Message {
            slave_id,
            data: data.to_vec(),
        });
    }

    fn error(&mut self, _driver: &SchedulerDriver, message: &str) {
        let _ = self.events.send(SchedulerCallback::Error(message.to_string()));
    }
}

fn scheduler_options(
    master: Endpoint,
    election: Option<ElectionBackend>,
) -> (
    SchedulerDriverOptions,
    mpsc::UnboundedReceiver<SchedulerCallback>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let options = SchedulerDriverOptions {
        framework: FrameworkInfo {
            name: "test".to_string(),
            user: "nobody".to_string(),
            executor: ExecutorInfo {
                uri: String::new(),
                data: vec![],
            },
        },
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        external_host: "127.0.0.1".to_string(),
        election: Some(election.unwrap_or(ElectionBackend::Static { leader: master })),
        retry: retry(),
        scheduler: Box::new(TestScheduler { events: tx }),
    };
    (options, rx)
}

fn scripted() -> (mpsc::Sender<LeaderEvent>, ElectionBackend) {
    let (tx, rx) = mpsc::channel(8);
    (tx, ElectionBackend::Scripted { events: rx })
}

fn task(task_id: u64, slave_id: SlaveId, res: &str) -> TaskDescription {
    TaskDescription {
        task_id: task_id.into(),
        slave_id,
        name: format!("task-{task_id}"),
        resources: resources(res),
        data: vec![],
        params: BTreeMap::new(),
    }
}

async fn next_callback(rx: &mut mpsc::UnboundedReceiver<SchedulerCallback>) -> SchedulerCallback {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a scheduler callback")
        .expect("scheduler driver went away")
}

async fn wait_for_registration(
    rx: &mut mpsc::UnboundedReceiver<SchedulerCallback>,
) -> (SchedulerDriver, FrameworkId) {
    loop {
        if let SchedulerCallback::Registered {
            driver,
            framework_id,
        } = next_callback(rx).await
        {
            return (driver, framework_id);
        }
    }
}

async fn wait_for_offer(
    rx: &mut mpsc::UnboundedReceiver<SchedulerCallback>,
) -> (SchedulerDriver, OfferId, Vec<SlaveOffer>) {
    loop {
        if let SchedulerCallback::Offer {
            driver,
            offer_id,
            offers,
        } = next_callback(rx).await
        {
            return (driver, offer_id, offers);
        }
    }
}

async fn wait_for_status(
    rx: &mut mpsc::UnboundedReceiver<SchedulerCallback>,
    task_id: TaskId,
) -> StatusUpdate {
    loop {
        if let SchedulerCallback::Status(update) = next_callback(rx).await {
            if update.task_id == task_id {
                return update;
            }
        }
    }
}

async fn master_state(handle: &ActorHandle<MasterActor>) -> MasterSnapshot {
    let (tx, rx) = oneshot::channel();
    handle
        .send(MasterEvent::GetState { result: tx })
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap()
}

async fn slave_state(handle: &ActorHandle<SlaveActor>) -> SlaveSnapshot {
    let (tx, rx) = oneshot::channel();
    handle
        .send(SlaveEvent::GetState { result: tx })
        .await
        .unwrap();
    timeout(WAIT, rx).await.unwrap().unwrap()
}

async fn wait_for_master<F>(handle: &ActorHandle<MasterActor>, predicate: F) -> MasterSnapshot
where
    F: Fn(&MasterSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = master_state(handle).await;
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for master state: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_slave<F>(handle: &ActorHandle<SlaveActor>, predicate: F) -> SlaveSnapshot
where
    F: Fn(&SlaveSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let snapshot = slave_state(handle).await;
        if predicate(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for slave state: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// The sum of resources in all outstanding offers of a snapshot.
fn offered_total(snapshot: &MasterSnapshot) -> Resources {
    let mut total = Resources::new();
    for offer in snapshot.offers.iter() {
        for (_, slice) in offer.slices.iter() {
            total.add(slice);
        }
    }
    total
}

#[tokio::test]
async fn test_register_and_offer() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (_, framework_id) = wait_for_registration(&mut events).await;
    assert_eq!(framework_id.epoch, 1);

    let (_, offer_id, offers) = wait_for_offer(&mut events).await;
    assert_eq!(offer_id.epoch, 1);
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].resources, resources("cpus:4;mem:1024"));
    assert_eq!(offers[0].hostname, "node1");

    let snapshot = master_state(&master_handle).await;
    assert!(snapshot.check_resource_conservation());
    assert_eq!(snapshot.offers.len(), 1);
    assert_eq!(snapshot.slaves.len(), 1);
}

#[tokio::test]
async fn test_launch_and_complete() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::FinishAfter(Duration::from_millis(100)),
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    driver.launch_tasks(offer_id, vec![task(1, offers[0].slave_id, "cpus:2;mem:512")]);

    // The slave is the source of truth: starting, running, finished,
    // in that order, each exactly once.
    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Starting);
    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Running);
    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Finished);
    assert_eq!(update.slave_id, Some(offers[0].slave_id));

    // Once the task is done, the full slave capacity is on offer again.
    let snapshot = wait_for_master(&master_handle, |snapshot| {
        offered_total(snapshot) == resources("cpus:4;mem:1024")
    })
    .await;
    assert!(snapshot.check_resource_conservation());
    assert!(snapshot
        .frameworks
        .iter()
        .all(|framework| framework.tasks.is_empty()));
}

#[tokio::test]
async fn test_partial_accept_reoffers_leftovers() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    assert_eq!(offers[0].resources, resources("cpus:4;mem:1024"));
    driver.launch_tasks(offer_id, vec![task(1, offers[0].slave_id, "cpus:1;mem:256")]);

    // The declined remainder comes back as a fresh offer.
    let (_, next_offer_id, next_offers) = wait_for_offer(&mut events).await;
    assert_ne!(next_offer_id, offer_id);
    assert_eq!(next_offers[0].resources, resources("cpus:3;mem:768"));

    let snapshot = master_state(&master_handle).await;
    assert!(snapshot.check_resource_conservation());
}

#[tokio::test]
async fn test_declined_offer_resources_return() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, _) = wait_for_offer(&mut events).await;
    // An empty launch declines the whole offer.
    driver.launch_tasks(offer_id, vec![]);

    let (_, next_offer_id, next_offers) = wait_for_offer(&mut events).await;
    assert_ne!(next_offer_id, offer_id);
    assert_eq!(next_offers[0].resources, resources("cpus:4;mem:1024"));

    let snapshot = master_state(&master_handle).await;
    assert!(snapshot.check_resource_conservation());
    // The settled offer is never referenced again.
    assert!(snapshot.offers.iter().all(|offer| offer.offer_id != offer_id));
}

#[tokio::test]
async fn test_kill_task() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let _master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    driver.launch_tasks(offer_id, vec![task(1, offers[0].slave_id, "cpus:2;mem:512")]);

    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Starting);
    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Running);

    driver.kill_task(1.into());
    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Killed);
}

#[tokio::test]
async fn test_framework_message_round_trip() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let _master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    let slave_id = offers[0].slave_id;
    driver.launch_tasks(offer_id, vec![task(1, slave_id, "cpus:1")]);
    loop {
        let update = wait_for_status(&mut events, 1.into()).await;
        if update.state == TaskState::Running {
            break;
        }
    }

    // The test executor echoes framework messages back verbatim.
    driver.send_framework_message(slave_id, b"ping".to_vec());
    loop {
        if let SchedulerCallback::Message { slave_id: from, data } =
            next_callback(&mut events).await
        {
            assert_eq!(from, slave_id);
            assert_eq!(data, b"ping".to_vec());
            break;
        }
    }
}

#[tokio::test]
async fn test_slave_loss_loses_tasks_and_offers() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    let slave_id = offers[0].slave_id;
    driver.launch_tasks(offer_id, vec![task(1, slave_id, "cpus:2;mem:512")]);
    loop {
        let update = wait_for_status(&mut events, 1.into()).await;
        if update.state == TaskState::Running {
            break;
        }
    }

    // Take the slave down while the task runs.
    slave_handle.send(SlaveEvent::Shutdown).await.unwrap();

    let update = wait_for_status(&mut events, 1.into()).await;
    assert_eq!(update.state, TaskState::Lost);
    assert_eq!(update.slave_id, Some(slave_id));

    // No offers may reference the lost slave, and no slaves remain.
    let snapshot = wait_for_master(&master_handle, |snapshot| snapshot.slaves.is_empty()).await;
    assert!(snapshot.offers.is_empty());
    assert!(snapshot.check_resource_conservation());
}

#[tokio::test]
async fn test_master_failover() {
    let p1 = free_port();
    let p2 = free_port();
    let m1 = master_endpoint(p1);
    let m2 = master_endpoint(p2);

    let (m1_events, m1_election) = scripted();
    let (m2_events, m2_election) = scripted();
    let (slave_events, slave_election) = scripted();
    let (scheduler_events, scheduler_election) = scripted();

    let mut system = ActorSystem::new();
    let _m1_handle = system.spawn::<MasterActor>(master_options(p1, Some(m1_election)));
    let m2_handle = system.spawn::<MasterActor>(master_options(p2, Some(m2_election)));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        m1.clone(),
        Some(slave_election),
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(m1.clone(), Some(scheduler_election));
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let epoch1 = LeaderEvent {
        epoch: 1,
        leader: Some(m1.clone()),
    };
    m1_events.send(epoch1.clone()).await.unwrap();
    m2_events.send(epoch1.clone()).await.unwrap();
    slave_events.send(epoch1.clone()).await.unwrap();
    scheduler_events.send(epoch1.clone()).await.unwrap();

    let (_, framework_id) = wait_for_registration(&mut events).await;
    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    let slave_id = offers[0].slave_id;
    driver.launch_tasks(offer_id, vec![task(1, slave_id, "cpus:2;mem:512")]);
    loop {
        let update = wait_for_status(&mut events, 1.into()).await;
        if update.state == TaskState::Running {
            break;
        }
    }

    // Leadership moves to the second master. The election service
    // notifies the new leader first here; the ordering across observers
    // is arbitrary in general and the epoch checks absorb it.
    let epoch2 = LeaderEvent {
        epoch: 2,
        leader: Some(m2.clone()),
    };
    m2_events.send(epoch2.clone()).await.unwrap();
    wait_for_master(&m2_handle, |snapshot| snapshot.leading && snapshot.epoch == 2).await;
    m1_events.send(epoch2.clone()).await.unwrap();
    slave_events.send(epoch2.clone()).await.unwrap();
    scheduler_events.send(epoch2.clone()).await.unwrap();

    // The new master rebuilds the task from the slave's re-registration
    // and the framework reconnects under its old identifier.
    let snapshot = wait_for_master(&m2_handle, |snapshot| {
        snapshot.leading
            && !snapshot.reconciling
            && snapshot
                .frameworks
                .iter()
                .any(|framework| framework.framework_id == framework_id && framework.connected)
            && snapshot.slaves.len() == 1
    })
    .await;
    assert!(snapshot.check_resource_conservation());
    let framework = snapshot
        .frameworks
        .iter()
        .find(|framework| framework.framework_id == framework_id)
        .unwrap();
    assert_eq!(framework.tasks.len(), 1);
    assert_eq!(framework.tasks[0].state, TaskState::Running);

    // Offers resume from the new master with the leftover capacity, and
    // the offer identifiers carry the new epoch. A leftover offer from
    // the old master may still be in flight; it is superseded.
    let offers = loop {
        let (_, offer_id, offers) = wait_for_offer(&mut events).await;
        if offer_id.epoch == 2 {
            break offers;
        }
    };
    assert_eq!(offers[0].resources, resources("cpus:2;mem:512"));

    // The running task saw no spurious transitions during failover.
    let snapshot = master_state(&m2_handle).await;
    let framework = snapshot
        .frameworks
        .iter()
        .find(|framework| framework.framework_id == framework_id)
        .unwrap();
    assert_eq!(framework.tasks[0].state, TaskState::Running);
}

#[tokio::test]
async fn test_duplicate_task_id_severs_framework() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let _scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    let slave_id = offers[0].slave_id;
    // Two tasks sharing one identifier: the first is accepted, the
    // second is a protocol violation that severs the framework.
    driver.launch_tasks(
        offer_id,
        vec![
            task(1, slave_id, "cpus:1;mem:256"),
            task(1, slave_id, "cpus:1;mem:256"),
        ],
    );

    loop {
        if let SchedulerCallback::Error(message) = next_callback(&mut events).await {
            assert!(message.contains("already exists"), "unexpected error: {message}");
            break;
        }
    }

    // The framework is gone from the master, its task is taken down on
    // the slave, and every resource is accounted for again.
    let snapshot = wait_for_master(&master_handle, |snapshot| snapshot.frameworks.is_empty()).await;
    assert!(snapshot.check_resource_conservation());
    wait_for_slave(&slave_handle, |snapshot| snapshot.frameworks.is_empty()).await;
}

#[tokio::test]
async fn test_unregister_framework_releases_resources() {
    let port = free_port();
    let master = master_endpoint(port);
    let mut system = ActorSystem::new();
    let master_handle = system.spawn::<MasterActor>(master_options(port, None));
    let _slave_handle = system.spawn::<SlaveActor>(slave_options(
        master.clone(),
        None,
        ExecutorBehavior::RunUntilKilled,
        "cpus:4;mem:1024",
    ));
    let (options, mut events) = scheduler_options(master.clone(), None);
    let scheduler_handle = system.spawn::<SchedulerDriverActor>(options);

    let (driver, offer_id, offers) = wait_for_offer(&mut events).await;
    driver.launch_tasks(offer_id, vec![task(1, offers[0].slave_id, "cpus:2;mem:512")]);
    loop {
        let update = wait_for_status(&mut events, 1.into()).await;
        if update.state == TaskState::Running {
            break;
        }
    }

    driver.stop();
    scheduler_handle.wait_for_stop().await;

    let snapshot = wait_for_master(&master_handle, |snapshot| snapshot.frameworks.is_empty()).await;
    assert!(snapshot.offers.is_empty());
    assert!(snapshot.check_resource_conservation());
    assert_eq!(snapshot.slaves[0].used, Resources::new());
}
