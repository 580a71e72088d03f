use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use strata_common::sync::lock;
use strata_common::{EntityId, MapId};
use strata_kernel::{
    AssignmentCallback, AssignmentRecord, GatewayError, OwnershipCallback, OwnershipRecord,
    PersistenceGateway,
};

use crate::store::{RecordStore, StoreError};

/// Runs every request against the store on the calling thread.
///
/// Callbacks fire before the request method returns.
#[derive(Clone)]
pub struct InlineGateway {
    store: Arc<Mutex<RecordStore>>,
}

impl InlineGateway {
    pub fn new(store: RecordStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn store(&self) -> Arc<Mutex<RecordStore>> {
        Arc::clone(&self.store)
    }
}

impl PersistenceGateway for InlineGateway {
    fn load_assignment(&self, entity: EntityId, done: AssignmentCallback) {
        let record = lock(&self.store).assignment(entity);
        done(Ok(record));
    }

    fn save_assignment(&self, entity: EntityId, record: AssignmentRecord) {
        lock(&self.store).put_assignment(entity, record);
    }

    fn load_all_ownership(&self, done: OwnershipCallback) {
        let rows = lock(&self.store).ownership_rows();
        done(Ok(rows));
    }

    fn save_ownership(&self, record: OwnershipRecord) {
        lock(&self.store).put_ownership(record);
    }

    fn delete_ownership_for_other_maps(&self, entity: EntityId, except: MapId) {
        lock(&self.store).delete_ownership_except(entity, except);
    }
}

enum Request {
    LoadAssignment {
        entity: EntityId,
        done: AssignmentCallback,
    },
    SaveAssignment {
        entity: EntityId,
        record: AssignmentRecord,
    },
    LoadAllOwnership {
        done: OwnershipCallback,
    },
    SaveOwnership(OwnershipRecord),
    DeleteOwnership {
        entity: EntityId,
        except: MapId,
    },
    Checkpoint,
    Flush(Sender<()>),
    Shutdown,
}

impl Request {
    /// Answer a request that can no longer reach the worker.
    fn reject(self) {
        match self {
            Request::LoadAssignment { done, .. } => done(Err(GatewayError::Closed)),
            Request::LoadAllOwnership { done } => done(Err(GatewayError::Closed)),
            Request::Flush(ack) => {
                let _ = ack.send(());
            }
            _ => {
                tracing::error!(target: "strata::persist", "persistence worker gone, write dropped");
            }
        }
    }
}

/// Persistence on a dedicated worker thread.
///
/// Requests queue on an unbounded channel and run in order; callbacks fire
/// on the worker thread. Dropping the gateway drains the queue, writes a
/// final checkpoint and joins the worker.
pub struct AsyncGateway {
    sender: Sender<Request>,
    store: Arc<Mutex<RecordStore>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncGateway {
    pub fn spawn(store: RecordStore) -> Result<Self, StoreError> {
        let store = Arc::new(Mutex::new(store));
        let (sender, receiver) = unbounded::<Request>();
        let worker_store = Arc::clone(&store);
        let handle = thread::Builder::new()
            .name("strata-persist".into())
            .spawn(move || run_worker(worker_store, receiver))?;
        Ok(Self {
            sender,
            store,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Shared handle to the backing store, for inspection.
    pub fn store(&self) -> Arc<Mutex<RecordStore>> {
        Arc::clone(&self.store)
    }

    /// Block until every request queued before this call has run.
    pub fn flush(&self) {
        let (ack, done) = bounded(1);
        self.submit(Request::Flush(ack));
        let _ = done.recv();
    }

    /// Ask the worker to write a checkpoint.
    pub fn checkpoint(&self) {
        self.submit(Request::Checkpoint);
    }

    fn submit(&self, request: Request) {
        if let Err(err) = self.sender.send(request) {
            err.into_inner().reject();
        }
    }
}

impl PersistenceGateway for AsyncGateway {
    fn load_assignment(&self, entity: EntityId, done: AssignmentCallback) {
        self.submit(Request::LoadAssignment { entity, done });
    }

    fn save_assignment(&self, entity: EntityId, record: AssignmentRecord) {
        self.submit(Request::SaveAssignment { entity, record });
    }

    fn load_all_ownership(&self, done: OwnershipCallback) {
        self.submit(Request::LoadAllOwnership { done });
    }

    fn save_ownership(&self, record: OwnershipRecord) {
        self.submit(Request::SaveOwnership(record));
    }

    fn delete_ownership_for_other_maps(&self, entity: EntityId, except: MapId) {
        self.submit(Request::DeleteOwnership { entity, except });
    }
}

impl Drop for AsyncGateway {
    fn drop(&mut self) {
        let _ = self.sender.send(Request::Shutdown);
        if let Some(handle) = lock(&self.worker).take() {
            if handle.join().is_err() {
                tracing::error!(target: "strata::persist", "persistence worker panicked");
            }
        }
    }
}

fn run_worker(store: Arc<Mutex<RecordStore>>, receiver: Receiver<Request>) {
    tracing::debug!(target: "strata::persist", "persistence worker started");
    for request in receiver.iter() {
        match request {
            Request::LoadAssignment { entity, done } => {
                let record = lock(&store).assignment(entity);
                done(Ok(record));
            }
            Request::SaveAssignment { entity, record } => {
                lock(&store).put_assignment(entity, record);
            }
            Request::LoadAllOwnership { done } => {
                let rows = lock(&store).ownership_rows();
                done(Ok(rows));
            }
            Request::SaveOwnership(record) => lock(&store).put_ownership(record),
            Request::DeleteOwnership { entity, except } => {
                lock(&store).delete_ownership_except(entity, except);
            }
            Request::Checkpoint => checkpoint(&store),
            Request::Flush(ack) => {
                let _ = ack.send(());
            }
            Request::Shutdown => break,
        }
    }
    checkpoint(&store);
    tracing::debug!(target: "strata::persist", "persistence worker stopped");
}

fn checkpoint(store: &Mutex<RecordStore>) {
    if let Err(err) = lock(store).checkpoint() {
        tracing::error!(target: "strata::persist", %err, "checkpoint failed");
    }
}
