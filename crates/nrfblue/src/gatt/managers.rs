//! Per-connection operation managers
//!
//! [`GattcOperationManager`] fronts the client-side read/write machinery:
//! one task queue per operation kind (read, write, write-without-response)
//! so different kinds can be in flight concurrently while same-kind
//! operations stay strictly serialized. [`GattsOperationManager`] fronts the
//! server-side notification/indication machinery the same way.
//!
//! Asynchronous failures are never raised; each task's callback receives a
//! [`CompletionReason`] alongside whatever data/status applies. Callbacks are
//! optional so a late completion after the caller gave up is simply dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::driver::events::{
    BleEvent, EventKind, ReadResponseEvent, TimeoutSource, TxCompleteEvent, WriteResponseEvent,
};
use crate::driver::{
    BleDriver, DriverError, EventDispatcher, ExecWriteFlag, GattStatus, HvxParams, HvxType,
    SubscriptionId, WriteOperation, WriteParams,
};
use crate::error::GattError;
use crate::peer::{Peer, PeerRole};

use super::cache::ValueCache;
use super::queue::{Begun, TaskQueue};
use super::reader::{GattcReader, ReadOutcome};
use super::server::GattsCharacteristic;
use super::types::{CompletionReason, SubscriptionState, WRITE_OVERHEAD};
use super::writer::{GattcWriter, WriteOutcome};

/// Result of a queued read
#[derive(Debug)]
pub struct ReadResult {
    pub id: u64,
    pub handle: u16,
    pub status: GattStatus,
    pub reason: CompletionReason,
    pub data: Vec<u8>,
}

/// Result of a queued write (with or without response)
#[derive(Debug)]
pub struct WriteResult {
    pub id: u64,
    pub handle: u16,
    pub status: GattStatus,
    pub reason: CompletionReason,
    /// The payload the caller submitted
    pub data: Vec<u8>,
}

/// Result of a queued notification or indication
#[derive(Debug)]
pub struct NotifyResult {
    pub id: u64,
    pub handle: u16,
    pub reason: CompletionReason,
    /// The payload actually sent (the cached value when the caller passed
    /// none)
    pub data: Vec<u8>,
}

pub type ReadCallback = Box<dyn FnOnce(ReadResult) + Send>;
pub type WriteCallback = Box<dyn FnOnce(WriteResult) + Send>;
pub type NotifyCallback = Box<dyn FnOnce(NotifyResult) + Send>;

struct ReadTask {
    id: u64,
    handle: u16,
    callback: Option<ReadCallback>,
}

struct WriteTask {
    id: u64,
    handle: u16,
    data: Vec<u8>,
    callback: Option<WriteCallback>,
}

struct NotificationTask {
    id: u64,
    characteristic: Arc<GattsCharacteristic>,
    handle: u16,
    /// Explicit payload, or `None` to send the cached characteristic value
    data: Option<Vec<u8>>,
    /// Filled in once the hvx primitive has been issued
    sent: Vec<u8>,
    callback: Option<NotifyCallback>,
}

/// Client-side read/write façade for one connection
pub struct GattcOperationManager {
    peer: Arc<Peer>,
    cache: Arc<ValueCache>,
    reader: GattcReader,
    writer: GattcWriter,
    driver: Arc<dyn BleDriver>,
    read_queue: TaskQueue<ReadTask>,
    write_queue: TaskQueue<WriteTask>,
    write_cmd_queue: TaskQueue<WriteTask>,
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl GattcOperationManager {
    /// `write_cmd_queue_depth` is the link layer's hardware TX queue depth
    /// for writes without response.
    pub fn new(
        driver: Arc<dyn BleDriver>,
        peer: Arc<Peer>,
        cache: Arc<ValueCache>,
        dispatcher: &EventDispatcher,
        write_cmd_queue_depth: usize,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            reader: GattcReader::new(Arc::clone(&driver), Arc::clone(&peer)),
            writer: GattcWriter::new(Arc::clone(&driver), Arc::clone(&peer)),
            driver,
            peer,
            cache,
            read_queue: TaskQueue::new(1),
            write_queue: TaskQueue::new(1),
            write_cmd_queue: TaskQueue::new(write_cmd_queue_depth.max(1)),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&manager);
        let ids = dispatcher.subscribe_all(
            &[
                EventKind::ReadResponse,
                EventKind::WriteResponse,
                EventKind::WriteCmdTxComplete,
                EventKind::Disconnected,
                EventKind::Timeout,
            ],
            Arc::new(move |event| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_event(event);
                }
            }),
        );
        *manager.subscriptions.lock().unwrap() = ids;
        manager
    }

    /// Removes this manager's event handlers; call when tearing down the
    /// owning connection object
    pub fn detach(&self, dispatcher: &EventDispatcher) {
        for id in self.subscriptions.lock().unwrap().drain(..) {
            dispatcher.unsubscribe(id);
        }
    }

    /// Queues a read of the attribute at `handle`. Returns the task id.
    pub fn read(&self, handle: u16, callback: ReadCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = ReadTask {
            id,
            handle,
            callback: Some(callback),
        };
        self.read_queue.enqueue(
            task,
            |t| self.begin_read(t),
            |t, r| Self::deliver_read(t, GattStatus::Unknown, r, Vec::new()),
        );
        id
    }

    /// Queues a write of `value` to the attribute at `handle`.
    ///
    /// With `with_response` the long-write procedure handles payloads of any
    /// length; without it the payload must fit a single PDU (`mtu - 3`).
    pub fn write(
        &self,
        handle: u16,
        value: &[u8],
        callback: WriteCallback,
        with_response: bool,
    ) -> Result<u64, GattError> {
        if value.is_empty() {
            return Err(GattError::EmptyValue);
        }
        if !with_response {
            let max = self.peer.mtu_size() as usize - WRITE_OVERHEAD;
            if value.len() > max {
                return Err(GattError::DataTooLong {
                    len: value.len(),
                    max,
                });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = WriteTask {
            id,
            handle,
            data: value.to_vec(),
            callback: Some(callback),
        };
        if with_response {
            self.write_queue.enqueue(
                task,
                |t| self.begin_write(t),
                |t, r| Self::deliver_write(t, GattStatus::Unknown, r),
            );
        } else {
            self.write_cmd_queue.enqueue(
                task,
                |t| self.begin_write_cmd(t),
                |t, r| Self::deliver_write(t, GattStatus::Unknown, r),
            );
        }
        Ok(id)
    }

    /// Fails everything still queued with `QueueCleared`
    pub fn clear_all(&self) {
        self.drain_queues(CompletionReason::QueueCleared);
    }

    fn handle_event(&self, event: &BleEvent) {
        match event {
            BleEvent::ReadResponse(e) => self.on_read_response(e),
            BleEvent::WriteResponse(e) => self.on_write_response(e),
            BleEvent::WriteCmdTxComplete(e) => self.on_write_cmd_tx_complete(e),
            BleEvent::Disconnected(e) => {
                if self.peer.matches(e.conn_handle) {
                    self.reader.reset();
                    self.writer.reset();
                    self.drain_queues(self.disconnect_reason());
                }
            }
            BleEvent::Timeout(e) => {
                if self.peer.matches(e.conn_handle) && e.source == TimeoutSource::GattClient {
                    self.drain_queues(CompletionReason::TimedOut);
                }
            }
            _ => {}
        }
    }

    fn on_read_response(&self, event: &ReadResponseEvent) {
        let Some(outcome) = self.reader.handle_read_response(event) else {
            return;
        };
        let ReadOutcome {
            handle,
            status,
            data,
        } = outcome;
        if status.is_success() {
            self.cache.update(handle, &data);
        }
        self.read_queue.complete_next(
            |t| Self::deliver_read(t, status, CompletionReason::Success, data),
            |t| self.begin_read(t),
            |t, r| Self::deliver_read(t, GattStatus::Unknown, r, Vec::new()),
        );
    }

    fn on_write_response(&self, event: &WriteResponseEvent) {
        let Some(outcome) = self.writer.handle_write_response(event) else {
            return;
        };
        let WriteOutcome {
            handle,
            status,
            data,
        } = outcome;
        if status.is_success() {
            self.cache.update(handle, &data);
        }
        self.write_queue.complete_next(
            |t| Self::deliver_write(t, status, CompletionReason::Success),
            |t| self.begin_write(t),
            |t, r| Self::deliver_write(t, GattStatus::Unknown, r),
        );
    }

    fn on_write_cmd_tx_complete(&self, event: &TxCompleteEvent) {
        if !self.peer.matches(event.conn_handle) {
            return;
        }
        for _ in 0..event.count {
            let completed = self.write_cmd_queue.complete_next(
                |t| {
                    self.cache.update(t.handle, &t.data);
                    Self::deliver_write(t, GattStatus::Success, CompletionReason::Success);
                },
                |t| self.begin_write_cmd(t),
                |t, r| Self::deliver_write(t, GattStatus::Unknown, r),
            );
            if !completed {
                log::warn!("TX credit with no write command in flight");
                break;
            }
        }
    }

    fn begin_read(&self, task: &mut ReadTask) -> Result<Begun, CompletionReason> {
        match self.reader.read(task.handle) {
            Ok(()) => Ok(Begun::InFlight),
            Err(e) => Err(self.failure_reason(e)),
        }
    }

    fn begin_write(&self, task: &mut WriteTask) -> Result<Begun, CompletionReason> {
        match self.writer.write(task.handle, &task.data) {
            Ok(()) => Ok(Begun::InFlight),
            Err(e) => Err(self.failure_reason(e)),
        }
    }

    fn begin_write_cmd(&self, task: &mut WriteTask) -> Result<Begun, CompletionReason> {
        let conn = match self.peer.conn_handle() {
            Some(conn) => conn,
            None => return Err(self.disconnect_reason()),
        };
        let params = WriteParams {
            operation: WriteOperation::WriteCommand,
            flags: ExecWriteFlag::Unused,
            handle: task.handle,
            offset: 0,
            data: task.data.clone(),
        };
        log::debug!(
            "Write command to handle {}: {}",
            task.handle,
            hex::encode(&task.data)
        );
        match self.driver.write(conn, &params) {
            Ok(()) => Ok(Begun::InFlight),
            Err(e) => Err(self.failure_reason(GattError::Driver(e))),
        }
    }

    fn drain_queues(&self, reason: CompletionReason) {
        self.read_queue.clear_all(reason, |t, r| {
            Self::deliver_read(t, GattStatus::Unknown, r, Vec::new())
        });
        self.write_queue
            .clear_all(reason, |t, r| Self::deliver_write(t, GattStatus::Unknown, r));
        self.write_cmd_queue
            .clear_all(reason, |t, r| Self::deliver_write(t, GattStatus::Unknown, r));
    }

    fn disconnect_reason(&self) -> CompletionReason {
        match self.peer.role() {
            PeerRole::Server => CompletionReason::ServerDisconnected,
            PeerRole::Client => CompletionReason::ClientDisconnected,
        }
    }

    fn failure_reason(&self, e: GattError) -> CompletionReason {
        match e {
            GattError::Driver(DriverError::InvalidConnectionHandle) | GattError::NotConnected => {
                self.disconnect_reason()
            }
            e => {
                log::error!("Failed to start GATT operation: {}", e);
                CompletionReason::Failed
            }
        }
    }

    fn deliver_read(
        mut task: ReadTask,
        status: GattStatus,
        reason: CompletionReason,
        data: Vec<u8>,
    ) {
        if let Some(callback) = task.callback.take() {
            callback(ReadResult {
                id: task.id,
                handle: task.handle,
                status,
                reason,
                data,
            });
        }
    }

    fn deliver_write(mut task: WriteTask, status: GattStatus, reason: CompletionReason) {
        if let Some(callback) = task.callback.take() {
            callback(WriteResult {
                id: task.id,
                handle: task.handle,
                status,
                reason,
                data: task.data,
            });
        }
    }
}

/// Server-side notification/indication façade for one connection
pub struct GattsOperationManager {
    driver: Arc<dyn BleDriver>,
    peer: Arc<Peer>,
    cache: Arc<ValueCache>,
    notification_queue: TaskQueue<NotificationTask>,
    indication_queue: TaskQueue<NotificationTask>,
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl GattsOperationManager {
    /// `hardware_queue_depth` is the link layer's TX queue depth for
    /// notifications; indications are always one at a time since each needs
    /// a confirmation.
    pub fn new(
        driver: Arc<dyn BleDriver>,
        peer: Arc<Peer>,
        cache: Arc<ValueCache>,
        dispatcher: &EventDispatcher,
        hardware_queue_depth: usize,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            driver,
            peer,
            cache,
            notification_queue: TaskQueue::new(hardware_queue_depth.max(1)),
            indication_queue: TaskQueue::new(1),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&manager);
        let ids = dispatcher.subscribe_all(
            &[
                EventKind::NotificationTxComplete,
                EventKind::IndicationConfirmed,
                EventKind::Disconnected,
                EventKind::Timeout,
            ],
            Arc::new(move |event| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_event(event);
                }
            }),
        );
        *manager.subscriptions.lock().unwrap() = ids;
        manager
    }

    pub fn detach(&self, dispatcher: &EventDispatcher) {
        for id in self.subscriptions.lock().unwrap().drain(..) {
            dispatcher.unsubscribe(id);
        }
    }

    /// Queues a notification or indication of `handle` on `characteristic`,
    /// picked by its current subscription state. Fails synchronously when
    /// the client is not subscribed at all. `data = None` sends the cached
    /// characteristic value.
    pub fn notify(
        &self,
        characteristic: &Arc<GattsCharacteristic>,
        handle: u16,
        callback: NotifyCallback,
        data: Option<Vec<u8>>,
    ) -> Result<u64, GattError> {
        let subscription = characteristic.subscription();
        if !subscription.is_subscribed() {
            return Err(GattError::NotSubscribed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = NotificationTask {
            id,
            characteristic: Arc::clone(characteristic),
            handle,
            data,
            sent: Vec::new(),
            callback: Some(callback),
        };
        let queue = match subscription {
            SubscriptionState::Indication => &self.indication_queue,
            _ => &self.notification_queue,
        };
        queue.enqueue(task, |t| self.begin_notification(t), Self::deliver);
        Ok(id)
    }

    /// Fails everything still queued with `QueueCleared`
    pub fn clear_all(&self) {
        self.drain_queues(CompletionReason::QueueCleared);
    }

    fn handle_event(&self, event: &BleEvent) {
        match event {
            BleEvent::NotificationTxComplete(e) => {
                if self.peer.matches(e.conn_handle) {
                    for _ in 0..e.count {
                        let completed = self.notification_queue.complete_next(
                            |t| Self::deliver(t, CompletionReason::Success),
                            |t| self.begin_notification(t),
                            Self::deliver,
                        );
                        if !completed {
                            log::warn!("TX credit with no notification in flight");
                            break;
                        }
                    }
                }
            }
            BleEvent::IndicationConfirmed(e) => {
                if self.peer.matches(e.conn_handle) {
                    self.indication_queue.complete_next(
                        |t| Self::deliver(t, CompletionReason::Success),
                        |t| self.begin_notification(t),
                        Self::deliver,
                    );
                }
            }
            BleEvent::Disconnected(e) => {
                if self.peer.matches(e.conn_handle) {
                    self.drain_queues(self.disconnect_reason());
                }
            }
            BleEvent::Timeout(e) => {
                if self.peer.matches(e.conn_handle) && e.source == TimeoutSource::GattServer {
                    self.drain_queues(CompletionReason::TimedOut);
                }
            }
            _ => {}
        }
    }

    fn begin_notification(&self, task: &mut NotificationTask) -> Result<Begun, CompletionReason> {
        // The client may have unsubscribed while the task sat in the queue.
        let subscription = task.characteristic.subscription();
        if !subscription.is_subscribed() {
            return Err(CompletionReason::ClientUnsubscribed);
        }
        let conn = match self.peer.conn_handle() {
            Some(conn) => conn,
            None => return Err(self.disconnect_reason()),
        };
        let payload = match &task.data {
            Some(data) => data.clone(),
            None => self.cache.get(task.handle).unwrap_or_default(),
        };
        let hvx_type = match subscription {
            SubscriptionState::Indication => HvxType::Indication,
            _ => HvxType::Notification,
        };
        let params = HvxParams {
            handle: task.handle,
            hvx_type,
            data: payload.clone(),
        };
        log::debug!(
            "hvx {:?} on handle {}: {}",
            hvx_type,
            task.handle,
            hex::encode(&payload)
        );
        match self.driver.hvx(conn, &params) {
            Ok(()) => {
                task.sent = payload;
                Ok(Begun::InFlight)
            }
            Err(DriverError::InvalidConnectionHandle) => Err(self.disconnect_reason()),
            Err(e) => {
                log::error!("Failed to issue hvx: {}", e);
                Err(CompletionReason::Failed)
            }
        }
    }

    fn drain_queues(&self, reason: CompletionReason) {
        self.notification_queue.clear_all(reason, Self::deliver);
        self.indication_queue.clear_all(reason, Self::deliver);
    }

    fn disconnect_reason(&self) -> CompletionReason {
        match self.peer.role() {
            PeerRole::Client => CompletionReason::ClientDisconnected,
            PeerRole::Server => CompletionReason::ServerDisconnected,
        }
    }

    fn deliver(mut task: NotificationTask, reason: CompletionReason) {
        if let Some(callback) = task.callback.take() {
            callback(NotifyResult {
                id: task.id,
                handle: task.handle,
                reason,
                data: task.sent,
            });
        }
    }
}
