// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Owns one logical connection to Telegram: a send loop that drains
//! queued requests into encrypted containers, a receive loop that
//! decrypts and dispatches whatever comes back, and the reconnection
//! machinery that keeps both running across transport hiccups.
//!
//! [`MTProtoSender`] is generic over the concrete [`Transport`] and owns
//! the factory used to (re)create one; [`SenderHandle`] is the
//! transport-erased, `Clone`-able half of it that callers actually hold
//! on to, so submitting a request never drags the transport's type
//! parameter through the rest of the application.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use getrandom::getrandom;
use log::{info, warn};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use web_time::Instant;

use grammers_mtproto::authentication;
use grammers_mtproto::packer::{MessagePacker, PackedRequest};
use grammers_mtproto::MTProtoState;
use grammers_tl_types::{self as tl, Cursor, Deserializable, Identifiable, RemoteCall, Serializable};

use crate::configuration::Configuration;
use crate::errors::{InvocationError, RpcError};
use crate::plain::PlainSender;
use crate::transport::{Transport, TransportReceiver, TransportSender};

/// How long the connection can stay silent before a keep-alive ping is
/// issued, and how long we'll wait for its pong before assuming the
/// connection is dead.
const PING_DELAY: std::time::Duration = std::time::Duration::from_secs(60);

/// How often, at most, a full updates queue is allowed to log a warning.
const UPDATE_BUFFER_FULL_WARN_DELAY: std::time::Duration = std::time::Duration::from_secs(900);

/// Bad-message-notification codes the sender knows how to recover from
/// by correcting its own state and resending the affected requests.
/// Anything else is surfaced to the caller as [`InvocationError::BadMessage`].
fn is_recoverable_bad_msg(code: i32) -> bool {
    matches!(code, 16 | 17 | 32 | 33)
}

/// A request waiting on a completion channel, either before it has been
/// handed to the transport (queued in `Shared::queue`, mirroring
/// [`MessagePacker`]'s own internal queue) or after (moved into
/// `Shared::pending`, keyed by its assigned message ID).
struct Queued {
    ctor: u32,
    body: Vec<u8>,
    tx: oneshot::Sender<Result<Vec<u8>, InvocationError>>,
}

/// A request that has been packed and written to the transport, still
/// awaiting its reply.
struct Pending {
    ctor: u32,
    body: Vec<u8>,
    container_id: i64,
    tx: oneshot::Sender<Result<Vec<u8>, InvocationError>>,
}

/// Everything the send loop and receive loop both need to touch. Guarded
/// by one `std::sync::Mutex` so that, even though each loop nominally
/// "owns" a different half of the state (send loop enqueues, receive
/// loop resolves), both can safely reach the shared `MTProtoState`.
struct Shared {
    state: MTProtoState,
    packer: MessagePacker,
    queue: VecDeque<Queued>,
    pending: HashMap<i64, Pending>,
    /// Bounded FIFO of `(ack_msg_id, container_id)` for the most recent
    /// acknowledgment messages we've sent, since the server never acks
    /// an ack and `pop_states` still needs to find them by container.
    last_acks: VecDeque<(i64, i64)>,
    /// Answer message IDs the receive loop owes the server an
    /// acknowledgment for, flushed by the send loop on its next pass.
    pending_ack: Vec<i64>,
    /// The outstanding keep-alive ping, if one hasn't been answered yet.
    ping_id: Option<i64>,
    next_ping: Instant,
}

impl Shared {
    fn new(state: MTProtoState) -> Self {
        Self {
            state,
            packer: MessagePacker::new(),
            queue: VecDeque::new(),
            pending: HashMap::new(),
            last_acks: VecDeque::with_capacity(10),
            pending_ack: Vec::new(),
            ping_id: None,
            next_ping: Instant::now() + PING_DELAY,
        }
    }

    /// Enqueues one already-serialized request, keeping `packer` and
    /// `queue` aligned: every `packer.enqueue` is immediately followed
    /// by exactly one push here, so popping both in lockstep after
    /// `pack()` recovers the originating completion for each packed
    /// request.
    fn enqueue(&mut self, packed: PackedRequest, queued: Queued) -> Result<(), InvocationError> {
        self.packer.enqueue(packed)?;
        self.queue.push_back(queued);
        Ok(())
    }

    /// Implements `pop_states` from the dispatch design: a direct
    /// `pending` hit, else every pending request batched into the same
    /// container, else a matching recent acknowledgment.
    fn pop_states(&mut self, msg_id: i64) -> Vec<Pending> {
        if let Some(pending) = self.pending.remove(&msg_id) {
            return vec![pending];
        }

        let ids: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.container_id == msg_id)
            .map(|(id, _)| *id)
            .collect();
        if !ids.is_empty() {
            return ids
                .into_iter()
                .filter_map(|id| self.pending.remove(&id))
                .collect();
        }

        if self.last_acks.iter().any(|(_, container)| *container == msg_id) {
            // The match was an ack, which never has a completion to
            // resolve; nothing further to do for the caller.
        }
        Vec::new()
    }
}

/// Transport-erased shared core: everything a caller needs to submit
/// requests and watch connection health, without naming the concrete
/// [`Transport`] implementation.
struct Core {
    shared: Mutex<Shared>,
    notify: Notify,
    user_connected: AtomicBool,
    reconnecting: AtomicBool,
    /// Signalled by `start_reconnect` to wake the reconnect supervisor;
    /// distinct from `notify`, which wakes the send loop whenever new
    /// work is queued.
    reconnect_notify: Notify,
    terminal_error: Mutex<Option<InvocationError>>,
    disconnected_notify: Notify,
    updates_tx: mpsc::Sender<tl::enums::Updates>,
    last_warn: Mutex<Option<Instant>>,
    /// The send and receive loop handles for whichever transport
    /// connection is currently live. Lives here, rather than on
    /// `MTProtoSender`, so the reconnect supervisor (which only holds
    /// `Arc<Core>`) can swap them out itself.
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

/// A cheap, `Clone`-able handle to a connected [`MTProtoSender`]. This is
/// what the rest of an application actually holds: submitting a request
/// only ever touches the shared queue and a completion channel, so it
/// never needs the sender's transport type parameter.
#[derive(Clone)]
pub struct SenderHandle {
    core: Arc<Core>,
}

impl SenderHandle {
    /// Whether the sender currently believes itself connected.
    pub fn is_connected(&self) -> bool {
        self.core.user_connected.load(Ordering::SeqCst) && !self.core.reconnecting.load(Ordering::SeqCst)
    }

    /// Submits a single request and returns once the server's reply has
    /// been parsed into its typed return value.
    pub async fn send<R>(&self, request: &R) -> Result<R::Return, InvocationError>
    where
        R: RemoteCall + Identifiable,
    {
        let rx = self.enqueue_one(request)?;
        let body = rx.await.map_err(|_| InvocationError::Dropped)??;
        Ok(R::read_result(&body)?)
    }

    /// Submits a heterogeneous batch of already-serialized requests.
    /// When `ordered` is set, each wraps the previous one's assigned
    /// message ID via `invoke_after`, guaranteeing server-side execution
    /// order; the receivers resolve independently and in any order.
    pub fn send_raw_many(
        &self,
        requests: Vec<(u32, Vec<u8>)>,
        ordered: bool,
    ) -> Result<Vec<oneshot::Receiver<Result<Vec<u8>, InvocationError>>>, InvocationError> {
        if !self.is_connected() {
            return Err(InvocationError::Dropped);
        }

        let mut shared = self.core.shared.lock().unwrap();
        let mut packed: Vec<PackedRequest> = Vec::with_capacity(requests.len());
        let mut queued: Vec<Queued> = Vec::with_capacity(requests.len());
        let mut receivers = Vec::with_capacity(requests.len());

        // `after` must point at the very `PackedRequest` that ends up
        // enqueued (and thus assigned an id by `pack()`), not a throwaway
        // copy with its own `IdSlot`, or the dependent would wait on a
        // slot nothing ever fills.
        for (ctor, body) in requests {
            let request = match (ordered, packed.last()) {
                (true, Some(predecessor)) => PackedRequest::after(body.clone(), predecessor),
                _ => PackedRequest::new(body.clone()),
            };
            let (tx, rx) = oneshot::channel();
            packed.push(request);
            queued.push(Queued { ctor, body, tx });
            receivers.push(rx);
        }

        for (request, queued) in packed.into_iter().zip(queued) {
            shared.enqueue(request, queued)?;
        }

        drop(shared);
        self.core.notify.notify_one();
        Ok(receivers)
    }

    fn enqueue_one<R: RemoteCall + Identifiable>(
        &self,
        request: &R,
    ) -> Result<oneshot::Receiver<Result<Vec<u8>, InvocationError>>, InvocationError> {
        if !self.is_connected() {
            return Err(InvocationError::Dropped);
        }

        let body = request.to_bytes();
        let (tx, rx) = oneshot::channel();
        let mut shared = self.core.shared.lock().unwrap();
        shared.enqueue(
            PackedRequest::new(body.clone()),
            Queued { ctor: R::CONSTRUCTOR_ID, body, tx },
        )?;
        drop(shared);
        self.core.notify.notify_one();
        Ok(rx)
    }

    /// Waits for the connection to go down for good, returning the
    /// terminal error that caused it, if any.
    pub async fn wait_disconnected(&self) -> Result<(), InvocationError> {
        loop {
            if !self.core.user_connected.load(Ordering::SeqCst) {
                return match self.core.terminal_error.lock().unwrap().take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            self.core.disconnected_notify.notified().await;
        }
    }
}

/// Owns the connection: the transport factory, the reconnection policy,
/// and the reconnect supervisor task spawned once [`MTProtoSender::connect`]
/// first succeeds. The send and receive loop handles themselves live on
/// [`Core`], since the supervisor (which only holds `Arc<Core>`, not `T`)
/// needs to replace them across reconnects too.
pub struct MTProtoSender<T: Transport + 'static> {
    core: Arc<Core>,
    make_transport: Arc<dyn Fn() -> T + Send + Sync>,
    config: Configuration,
    connect_lock: AsyncMutex<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> MTProtoSender<T> {
    /// Builds a sender around a transport factory (invoked once per
    /// connection attempt, since [`Transport::split`] consumes its
    /// receiver) and a channel updates are forwarded to.
    pub fn new<F>(
        make_transport: F,
        config: Configuration,
        updates_tx: mpsc::Sender<tl::enums::Updates>,
    ) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            core: Arc::new(Core {
                shared: Mutex::new(Shared::new(MTProtoState::new())),
                notify: Notify::new(),
                user_connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                reconnect_notify: Notify::new(),
                terminal_error: Mutex::new(None),
                disconnected_notify: Notify::new(),
                updates_tx,
                last_warn: Mutex::new(None),
                tasks: Mutex::new(None),
            }),
            make_transport: Arc::new(make_transport),
            config,
            connect_lock: AsyncMutex::new(()),
            supervisor: Mutex::new(None),
        }
    }

    /// A transport-erased handle that can be cloned and sent anywhere
    /// without this sender's type parameter following it.
    pub fn handle(&self) -> SenderHandle {
        SenderHandle { core: self.core.clone() }
    }

    pub fn is_connected(&self) -> bool {
        self.handle().is_connected()
    }

    pub async fn wait_disconnected(&self) -> Result<(), InvocationError> {
        self.handle().wait_disconnected().await
    }

    /// Connects the transport, negotiating a fresh authorization key
    /// over the plain sender first if none is held yet, then spawns the
    /// send and receive loops (and, on the very first successful
    /// connection, the long-lived reconnect supervisor). Retries up to
    /// `config.retries` times.
    pub async fn connect(&self) -> Result<bool, InvocationError> {
        let _guard = self.connect_lock.lock().await;

        let has_key = self.core.shared.lock().unwrap().state.auth_key().is_some();

        let mut transport = (self.make_transport)();
        let mut attempt = 0;
        loop {
            match try_connect_transport(&self.core, &mut transport, has_key).await {
                Ok(()) => break,
                Err(err) if attempt < self.config.retries => {
                    attempt += 1;
                    warn!("connection attempt {attempt} failed: {err}, retrying");
                    tokio::time::sleep(self.config.delay).await;
                    transport = (self.make_transport)();
                }
                Err(err) => return Err(err),
            }
        }

        let (sender, receiver) = transport.split();
        self.core.user_connected.store(true, Ordering::SeqCst);
        self.core.reconnecting.store(false, Ordering::SeqCst);
        *self.core.terminal_error.lock().unwrap() = None;

        let send_task = tokio::spawn(run_send_loop(self.core.clone(), sender));
        let recv_task = tokio::spawn(run_recv_loop(self.core.clone(), receiver, self.config.clone()));
        *self.core.tasks.lock().unwrap() = Some((send_task, recv_task));

        let mut supervisor = self.supervisor.lock().unwrap();
        if supervisor.is_none() {
            *supervisor = Some(tokio::spawn(run_reconnect_supervisor(
                self.core.clone(),
                self.make_transport.clone(),
                self.config.clone(),
            )));
        }

        Ok(!has_key)
    }

    /// Tears the connection down and completes every pending request
    /// with [`InvocationError::Dropped`].
    pub async fn disconnect(&self) {
        self.core.user_connected.store(false, Ordering::SeqCst);
        if let Some(supervisor) = self.supervisor.lock().unwrap().take() {
            supervisor.abort();
        }
        if let Some((send_task, recv_task)) = self.core.tasks.lock().unwrap().take() {
            send_task.abort();
            recv_task.abort();
        }

        let mut shared = self.core.shared.lock().unwrap();
        for (_, pending) in shared.pending.drain() {
            let _ = pending.tx.send(Err(InvocationError::Dropped));
        }
        for queued in shared.queue.drain(..) {
            let _ = queued.tx.send(Err(InvocationError::Dropped));
        }
        drop(shared);

        self.core.disconnected_notify.notify_waiters();
    }
}

/// Connects `transport` and, if no authorization key is held yet,
/// negotiates one over it via the plain sender. Shared between the
/// initial [`MTProtoSender::connect`] and the reconnect supervisor so
/// both retry the exact same way.
async fn try_connect_transport<T: Transport>(
    core: &Arc<Core>,
    transport: &mut T,
    has_key: bool,
) -> Result<(), InvocationError> {
    transport.connect().await?;

    if !has_key {
        let (auth_key, time_offset, first_salt) = negotiate_auth_key(transport).await?;
        let mut shared = core.shared.lock().unwrap();
        shared.state.set_auth_key(auth_key, time_offset);
        shared.state.set_salt(first_salt);
    }

    Ok(())
}

/// Runs alongside the connection for its entire lifetime, woken by
/// `start_reconnect` whenever the send or receive loop hits a transport
/// error or loses keep-alive liveness. Implements §4.4.4: tear down the
/// old transport, reset session-scoped state, retry `connect()` up to
/// `config.retries` times (or not at all if auto-reconnect is disabled),
/// and re-enqueue whatever was left pending.
async fn run_reconnect_supervisor<T: Transport + 'static>(
    core: Arc<Core>,
    make_transport: Arc<dyn Fn() -> T + Send + Sync>,
    config: Configuration,
) {
    loop {
        core.reconnect_notify.notified().await;

        if !core.user_connected.load(Ordering::SeqCst) {
            return;
        }
        if !core.reconnecting.load(Ordering::SeqCst) {
            continue;
        }

        if let Some((send_task, recv_task)) = core.tasks.lock().unwrap().take() {
            send_task.abort();
            recv_task.abort();
            let _ = send_task.await;
            let _ = recv_task.await;
        }

        // A fresh session ID is mandatory after any reconnect: reusing
        // the old one would let the server match incoming messages
        // against message IDs it already considers stale.
        core.shared.lock().unwrap().state.reset();

        let max_attempts = if config.auto_reconnect { config.retries } else { 0 };
        let mut attempt = 0;
        let outcome = loop {
            let mut transport = make_transport();
            let has_key = core.shared.lock().unwrap().state.auth_key().is_some();
            match try_connect_transport(&core, &mut transport, has_key).await {
                Ok(()) => break Ok(transport),
                Err(InvocationError::InvalidBuffer) => break Err(InvocationError::InvalidBuffer),
                Err(err) if attempt < max_attempts => {
                    attempt += 1;
                    warn!("reconnect attempt {attempt} failed: {err}, retrying");
                    tokio::time::sleep(config.delay).await;
                }
                Err(err) => break Err(err),
            }
        };

        match outcome {
            Ok(transport) => {
                let (sender, receiver) = transport.split();
                core.reconnecting.store(false, Ordering::SeqCst);

                let to_resend: Vec<Pending> = {
                    let mut shared = core.shared.lock().unwrap();
                    shared.pending.drain().map(|(_, p)| p).collect()
                };
                {
                    let mut shared = core.shared.lock().unwrap();
                    for pending in to_resend {
                        resend(&mut shared, pending);
                    }
                }
                core.notify.notify_one();

                let send_task = tokio::spawn(run_send_loop(core.clone(), sender));
                let recv_task = tokio::spawn(run_recv_loop(core.clone(), receiver, config.clone()));
                *core.tasks.lock().unwrap() = Some((send_task, recv_task));
            }
            Err(InvocationError::InvalidBuffer) => {
                core.shared.lock().unwrap().state.clear_auth_key();
                terminal_disconnect(&core, InvocationError::InvalidBuffer);
                return;
            }
            Err(err) => {
                terminal_disconnect(&core, err);
                return;
            }
        }
    }
}

/// Ends the connection for good: marks it disconnected, records the
/// terminal error for [`SenderHandle::wait_disconnected`], and completes
/// every pending and queued request with [`InvocationError::Dropped`]
/// (matching the behavior of an explicit [`MTProtoSender::disconnect`]).
fn terminal_disconnect(core: &Arc<Core>, err: InvocationError) {
    core.user_connected.store(false, Ordering::SeqCst);
    core.reconnecting.store(false, Ordering::SeqCst);
    *core.terminal_error.lock().unwrap() = Some(err);

    let mut shared = core.shared.lock().unwrap();
    for (_, pending) in shared.pending.drain() {
        let _ = pending.tx.send(Err(InvocationError::Dropped));
    }
    for queued in shared.queue.drain(..) {
        let _ = queued.tx.send(Err(InvocationError::Dropped));
    }
    drop(shared);

    core.disconnected_notify.notify_waiters();
}

/// Runs the Diffie-Hellman handshake over the plain sender, driving the
/// free-function step API with whatever the transport gives back.
async fn negotiate_auth_key<T: Transport>(
    transport: &mut T,
) -> Result<(grammers_mtproto::AuthKey, i32, i64), InvocationError> {
    let mut plain = PlainSender::new(transport);

    let (request, data) = authentication::step1()?;
    let response = plain.send(request).await?;

    let (request, data) = authentication::step2(data, &response)?;
    let response = plain.send(request).await?;

    let (request, data) = authentication::step3(data, &response)?;
    let response = plain.send(request).await?;

    let finished = authentication::create_key(data, &response)?;
    Ok((
        grammers_mtproto::AuthKey::from_bytes(finished.auth_key),
        finished.time_offset,
        finished.first_salt,
    ))
}

/// The send loop: drains `pending_ack`, issues keep-alive pings, packs
/// whatever is queued, and writes the result to the transport.
async fn run_send_loop<S: TransportSender>(core: Arc<Core>, mut sender: S) {
    loop {
        if !core.user_connected.load(Ordering::SeqCst) || core.reconnecting.load(Ordering::SeqCst) {
            return;
        }

        let mut liveness_lost = false;
        let wait = {
            let mut shared = core.shared.lock().unwrap();

            if !shared.pending_ack.is_empty() {
                let ids = std::mem::take(&mut shared.pending_ack);
                let body = tl::types::MsgsAck { msg_ids: ids }.to_bytes();
                let (tx, _rx) = oneshot::channel();
                let _ = shared.enqueue(
                    PackedRequest::not_content_related(body.clone()),
                    Queued { ctor: tl::types::MsgsAck::CONSTRUCTOR_ID, body, tx },
                );
            }

            if Instant::now() >= shared.next_ping {
                if shared.ping_id.is_some() {
                    // The previous keep-alive was never answered: the
                    // connection is presumed dead.
                    liveness_lost = true;
                } else {
                    let mut buf = [0u8; 8];
                    getrandom(&mut buf).expect("failed to generate a ping id");
                    let ping_id = i64::from_le_bytes(buf);
                    shared.ping_id = Some(ping_id);
                    shared.next_ping = Instant::now() + PING_DELAY;

                    let body = tl::functions::PingDelayDisconnect {
                        ping_id,
                        disconnect_delay: (PING_DELAY.as_secs() * 2) as i32,
                    }
                    .to_bytes();
                    let (tx, _rx) = oneshot::channel();
                    let _ = shared.enqueue(
                        PackedRequest::not_content_related(body.clone()),
                        Queued { ctor: tl::functions::PingDelayDisconnect::CONSTRUCTOR_ID, body, tx },
                    );
                }
            }

            if liveness_lost {
                None
            } else {
                match shared.packer.pack(&mut shared.state) {
                    Some((batch, payload)) => {
                        for request in &batch {
                            let queued = shared.queue.pop_front().expect(
                                "queue and packer stay aligned: every enqueue pushes exactly one Queued",
                            );
                            if let Some(msg_id) = request.msg_id() {
                                let container_id = request
                                    .container_msg_id()
                                    .map(|id| id.0)
                                    .unwrap_or(msg_id.0);
                                // Acks and pings have no caller awaiting a
                                // reply worth keeping; drop their sender.
                                if queued.ctor == tl::types::MsgsAck::CONSTRUCTOR_ID {
                                    shared.last_acks.push_back((msg_id.0, container_id));
                                    if shared.last_acks.len() > 10 {
                                        shared.last_acks.pop_front();
                                    }
                                } else {
                                    shared.pending.insert(
                                        msg_id.0,
                                        Pending {
                                            ctor: queued.ctor,
                                            body: queued.body,
                                            container_id,
                                            tx: queued.tx,
                                        },
                                    );
                                }
                            }
                        }

                        let ciphertext = match shared.state.encrypt_message_data(payload) {
                            Ok(bytes) => bytes,
                            Err(err) => {
                                warn!("failed to encrypt outgoing payload: {err}");
                                continue;
                            }
                        };
                        Some(ciphertext)
                    }
                    None => None,
                }
            }
        };

        if liveness_lost {
            warn!("no pong received before the next keep-alive deadline, reconnecting");
            start_reconnect(&core);
            return;
        }

        match wait {
            Some(ciphertext) => {
                if let Err(err) = sender.send(&ciphertext).await {
                    warn!("transport write failed: {err}, reconnecting");
                    start_reconnect(&core);
                    return;
                }
            }
            None => {
                let deadline = {
                    let shared = core.shared.lock().unwrap();
                    shared.next_ping
                };
                let timeout = deadline.saturating_duration_since(Instant::now());
                tokio::select! {
                    _ = core.notify.notified() => {}
                    _ = tokio::time::sleep(timeout) => {}
                }
            }
        }
    }
}

/// The receive loop: reads one framed message, decrypts it, and
/// dispatches it by constructor ID.
async fn run_recv_loop<R: TransportReceiver>(core: Arc<Core>, mut receiver: R, config: Configuration) {
    loop {
        if !core.user_connected.load(Ordering::SeqCst) || core.reconnecting.load(Ordering::SeqCst) {
            return;
        }

        let raw = match receiver.recv().await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("transport read failed: {err}, reconnecting");
                start_reconnect(&core);
                return;
            }
        };

        // Telegram signals transport-level rejections (e.g. -404, the
        // authorization key being invalid) as a bare 4-byte error code
        // instead of an encrypted message.
        if raw.len() == 4 {
            let code = i32::from_le_bytes(raw[..4].try_into().unwrap());
            warn!("transport reported error code {code}");
            if code == -404 {
                core.shared.lock().unwrap().state.clear_auth_key();
                terminal_disconnect(&core, InvocationError::InvalidBuffer);
                return;
            }
            start_reconnect(&core);
            return;
        }

        let message = {
            let shared = core.shared.lock().unwrap();
            shared.state.decrypt_message_data(&raw)
        };

        let message = match message {
            Ok(message) => message,
            Err(grammers_mtproto::errors::Error::Crypto(_))
            | Err(grammers_mtproto::errors::Error::BadSessionId { .. }) => {
                warn!("dropping message that failed a security check");
                continue;
            }
            Err(err) => {
                warn!("failed to decrypt incoming message: {err}, reconnecting");
                start_reconnect(&core);
                return;
            }
        };

        dispatch(&core, message.msg_id, message.seq_no, message.body, &config).await;
    }
}

/// Recursively dispatches one decrypted message's body by constructor
/// ID: containers and gzip are unwrapped in place, everything else is
/// looked up in the dispatch table from §4.4.2.
fn dispatch<'a>(
    core: &'a Arc<Core>,
    msg_id: i64,
    seq_no: i32,
    body: Vec<u8>,
    config: &'a Configuration,
) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let ctor = match u32::from_bytes(&body) {
            Ok(ctor) => ctor,
            Err(_) => return,
        };

        if seq_no % 2 == 1 {
            core.shared.lock().unwrap().pending_ack.push(msg_id);
        }

        if ctor == tl::MessageContainer::CONSTRUCTOR_ID {
            let container = match tl::MessageContainer::from_bytes(&body) {
                Ok(c) => c,
                Err(_) => return,
            };
            for inner in container.messages {
                dispatch(core, inner.msg_id, inner.seq_no, inner.body, config).await;
            }
            return;
        }

        if ctor == tl::GzipPacked::CONSTRUCTOR_ID {
            let gzip = match tl::GzipPacked::from_bytes(&body) {
                Ok(g) => g,
                Err(_) => return,
            };
            match gzip.decompress() {
                Ok(inflated) => dispatch(core, msg_id, seq_no, inflated, config).await,
                Err(err) => warn!("failed to inflate gzip_packed: {err}"),
            }
            return;
        }

        if ctor == tl::RpcResult::CONSTRUCTOR_ID {
            handle_rpc_result(core, &body);
            return;
        }

        if ctor == tl::types::Pong::CONSTRUCTOR_ID {
            handle_pong(core, &body);
            return;
        }

        if ctor == tl::types::BadServerSalt::CONSTRUCTOR_ID {
            handle_bad_server_salt(core, &body);
            return;
        }

        if ctor == tl::types::BadMsgNotification::CONSTRUCTOR_ID {
            handle_bad_msg_notification(core, msg_id, &body);
            return;
        }

        if ctor == tl::types::MsgDetailedInfo::CONSTRUCTOR_ID {
            if let Ok(info) = tl::types::MsgDetailedInfo::from_bytes(&body) {
                core.shared.lock().unwrap().pending_ack.push(info.answer_msg_id);
            }
            return;
        }

        if ctor == tl::types::MsgNewDetailedInfo::CONSTRUCTOR_ID {
            if let Ok(info) = tl::types::MsgNewDetailedInfo::from_bytes(&body) {
                core.shared.lock().unwrap().pending_ack.push(info.answer_msg_id);
            }
            return;
        }

        if ctor == tl::types::NewSessionCreated::CONSTRUCTOR_ID {
            if let Ok(created) = tl::types::NewSessionCreated::from_bytes(&body) {
                core.shared.lock().unwrap().state.set_salt(created.server_salt);
            }
            return;
        }

        if ctor == tl::types::MsgsAck::CONSTRUCTOR_ID {
            handle_msgs_ack(core, &body);
            return;
        }

        if ctor == tl::types::FutureSalts::CONSTRUCTOR_ID {
            if let Ok(salts) = tl::types::FutureSalts::from_bytes(&body) {
                let mut shared = core.shared.lock().unwrap();
                if let Some(pending) = shared.pending.remove(&salts.req_msg_id) {
                    let _ = pending.tx.send(Ok(body));
                }
            }
            return;
        }

        if ctor == tl::types::MsgsStateReq::CONSTRUCTOR_ID || ctor == tl::types::MsgResendReq::CONSTRUCTOR_ID {
            let msg_ids = if ctor == tl::types::MsgsStateReq::CONSTRUCTOR_ID {
                tl::types::MsgsStateReq::from_bytes(&body).map(|r| r.msg_ids)
            } else {
                tl::types::MsgResendReq::from_bytes(&body).map(|r| r.msg_ids)
            };
            if let Ok(msg_ids) = msg_ids {
                let info = tl::types::MsgsStateInfo {
                    req_msg_id: msg_id,
                    info: vec![1u8; msg_ids.len()],
                }
                .to_bytes();
                let (tx, _rx) = oneshot::channel();
                let mut shared = core.shared.lock().unwrap();
                let _ = shared.enqueue(
                    PackedRequest::not_content_related(info.clone()),
                    Queued { ctor: tl::types::MsgsStateInfo::CONSTRUCTOR_ID, body: info, tx },
                );
                drop(shared);
                core.notify.notify_one();
            }
            return;
        }

        if ctor == tl::types::MsgsAllInfo::CONSTRUCTOR_ID {
            // Deliberately a no-op: nothing in this sender consumes
            // bulk state reports.
            return;
        }

        if ctor == tl::types::DestroySessionOk::CONSTRUCTOR_ID || ctor == tl::types::DestroySessionNone::CONSTRUCTOR_ID
        {
            let reply_session_id = if ctor == tl::types::DestroySessionOk::CONSTRUCTOR_ID {
                tl::types::DestroySessionOk::from_bytes(&body)
                    .ok()
                    .map(|r| r.session_id)
            } else {
                tl::types::DestroySessionNone::from_bytes(&body)
                    .ok()
                    .map(|r| r.session_id)
            };

            if let Some(reply_session_id) = reply_session_id {
                let mut shared = core.shared.lock().unwrap();
                let matching = shared
                    .pending
                    .iter()
                    .find(|(_, p)| {
                        p.ctor == tl::functions::DestroySession::CONSTRUCTOR_ID
                            && destroy_session_id(&p.body) == Some(reply_session_id)
                    })
                    .map(|(id, _)| *id);
                if let Some(id) = matching {
                    if let Some(pending) = shared.pending.remove(&id) {
                        let _ = pending.tx.send(Ok(body));
                    }
                }
            }
            return;
        }

        if ctor == tl::UPDATES_SUBCLASS_OF_ID || is_updates_ctor(ctor) {
            if let Ok(updates) = tl::enums::Updates::from_bytes(&body) {
                forward_update(core, updates).await;
            }
            return;
        }

        let _ = config;
        warn!("unhandled constructor while dispatching: {:08x} ({})", ctor, tl::name_for_id(ctor));
    })
}

/// Pulls the `session_id` out of an already-serialized `destroy_session`
/// request body (constructor id followed by the long).
fn destroy_session_id(body: &[u8]) -> Option<i64> {
    let mut cursor = Cursor::from_slice(body);
    let _ctor = u32::deserialize(&mut cursor).ok()?;
    i64::deserialize(&mut cursor).ok()
}

fn is_updates_ctor(ctor: u32) -> bool {
    ctor == tl::enums::Updates::TOO_LONG_ID
        || ctor == tl::enums::UpdateShort::CONSTRUCTOR_ID
        || ctor == tl::types::UpdatesCombined::CONSTRUCTOR_ID
        || ctor == tl::types::Updates::CONSTRUCTOR_ID
        || ctor == tl::enums::UpdateShortSentMessage::CONSTRUCTOR_ID
}

async fn forward_update(core: &Arc<Core>, updates: tl::enums::Updates) {
    try_forward_update(core, updates);
}

/// The non-async body of [`forward_update`]: `try_send` never actually
/// awaits anything, so [`handle_rpc_result`] (a sync fn, called from the
/// receive loop alongside its own lock juggling) can reuse it directly
/// to forward an `Updates` value embedded in an RPC result.
fn try_forward_update(core: &Arc<Core>, updates: tl::enums::Updates) {
    if let Err(mpsc::error::TrySendError::Full(_)) = core.updates_tx.try_send(updates) {
        let mut last_warn = core.last_warn.lock().unwrap();
        let now = Instant::now();
        if last_warn.map(|at| now.duration_since(at) >= UPDATE_BUFFER_FULL_WARN_DELAY).unwrap_or(true) {
            warn!("updates queue is full, dropping an update");
            *last_warn = Some(now);
        }
    }
}

fn handle_rpc_result(core: &Arc<Core>, body: &[u8]) {
    let result = match tl::RpcResult::from_bytes(body) {
        Ok(result) => result,
        Err(err) => {
            warn!("failed to parse rpc_result: {err}");
            return;
        }
    };

    let mut shared = core.shared.lock().unwrap();
    let Some(pending) = shared.pending.remove(&result.req_msg_id) else {
        return;
    };

    let inner_ctor = u32::from_bytes(&result.result).ok();

    if inner_ctor == Some(tl::types::RpcError::CONSTRUCTOR_ID) {
        match tl::types::RpcError::from_bytes(&result.result) {
            Ok(error) => {
                let ack = tl::types::MsgsAck { msg_ids: vec![result.req_msg_id] }.to_bytes();
                let (tx, _rx) = oneshot::channel();
                let _ = shared.enqueue(
                    PackedRequest::not_content_related(ack.clone()),
                    Queued { ctor: tl::types::MsgsAck::CONSTRUCTOR_ID, body: ack, tx },
                );
                let rpc_error = RpcError::from(error).with_caused_by(pending.ctor);
                let _ = pending.tx.send(Err(InvocationError::Rpc(rpc_error)));
            }
            Err(err) => {
                let _ = pending.tx.send(Err(InvocationError::Deserialize(err)));
            }
        }
        drop(shared);
        core.notify.notify_one();
        return;
    }

    let payload = if inner_ctor == Some(tl::GzipPacked::CONSTRUCTOR_ID) {
        match tl::GzipPacked::from_bytes(&result.result).and_then(|g| g.decompress()) {
            Ok(inflated) => inflated,
            Err(err) => {
                let _ = pending.tx.send(Err(InvocationError::Deserialize(err)));
                return;
            }
        }
    } else {
        result.result
    };

    if pending.ctor == tl::functions::LogOut::CONSTRUCTOR_ID {
        // Telegram never actually sends an rpc_result for LogOut; this
        // branch only exists in case a future server build starts to.
        let _ = pending.tx.send(Ok(true.to_bytes()));
        return;
    }

    // An embedded `Updates` (e.g. the `UpdateShortSentMessage` paired
    // with the request that triggered it) must still reach the updates
    // channel; only the raw body is handed back to the caller.
    let payload_ctor = u32::from_bytes(&payload).ok();
    if payload_ctor.map(is_updates_ctor).unwrap_or(false) {
        if let Ok(updates) = tl::enums::Updates::from_bytes(&payload) {
            drop(shared);
            try_forward_update(core, updates);
            let _ = pending.tx.send(Ok(payload));
            return;
        }
    }

    drop(shared);
    let _ = pending.tx.send(Ok(payload));
}

fn handle_pong(core: &Arc<Core>, body: &[u8]) {
    let Ok(pong) = tl::types::Pong::from_bytes(body) else {
        return;
    };

    let mut shared = core.shared.lock().unwrap();
    if shared.ping_id == Some(pong.ping_id) {
        shared.ping_id = None;
    }
    if let Some(pending) = shared.pending.remove(&pong.msg_id) {
        drop(shared);
        let _ = pending.tx.send(Ok(body.to_vec()));
    }
}

fn handle_bad_server_salt(core: &Arc<Core>, body: &[u8]) {
    let Ok(bad_salt) = tl::types::BadServerSalt::from_bytes(body) else {
        return;
    };

    let mut shared = core.shared.lock().unwrap();
    shared.state.set_salt(bad_salt.new_server_salt);
    let affected = shared.pop_states(bad_salt.bad_msg_id);
    for pending in affected {
        resend(&mut shared, pending);
    }
    drop(shared);
    core.notify.notify_one();
}

fn handle_bad_msg_notification(core: &Arc<Core>, msg_id: i64, body: &[u8]) {
    let Ok(notification) = tl::types::BadMsgNotification::from_bytes(body) else {
        return;
    };

    let mut shared = core.shared.lock().unwrap();
    let affected = shared.pop_states(notification.bad_msg_id);

    match notification.error_code {
        16 | 17 => shared.state.correct_time_offset(msg_id),
        32 => shared.state.bump_sequence(64),
        33 => shared.state.bump_sequence(-16),
        code if is_recoverable_bad_msg(code) => {}
        code => {
            for pending in affected {
                let _ = pending.tx.send(Err(InvocationError::BadMessage { code }));
            }
            return;
        }
    }

    for pending in affected {
        resend(&mut shared, pending);
    }
    drop(shared);
    core.notify.notify_one();
}

fn handle_msgs_ack(core: &Arc<Core>, body: &[u8]) {
    let Ok(ack) = tl::types::MsgsAck::from_bytes(body) else {
        return;
    };

    let mut shared = core.shared.lock().unwrap();
    for id in ack.msg_ids {
        if let Some(pending) = shared.pending.get(&id) {
            if pending.ctor == tl::functions::LogOut::CONSTRUCTOR_ID {
                let pending = shared.pending.remove(&id).unwrap();
                let _ = pending.tx.send(Ok(true.to_bytes()));
            }
        }
    }
}

/// Re-enqueues a previously-pending request under a fresh message ID,
/// after a bad-salt or recoverable bad-msg correction (or after a
/// reconnect put every still-pending request back in the queue).
fn resend(shared: &mut Shared, pending: Pending) {
    let packed = PackedRequest::new(pending.body.clone());
    let queued = Queued { ctor: pending.ctor, body: pending.body, tx: pending.tx };
    if let Err(err) = shared.enqueue(packed, queued) {
        warn!("could not resend a request after a state correction: {err}");
    }
}

/// Marks the sender as reconnecting (idempotently) and wakes the
/// reconnect supervisor described in §4.4.4. Both background loops
/// observe `reconnecting` and exit on their own; the supervisor owns
/// tearing the old transport down, resetting state, retrying `connect()`,
/// and re-enqueuing whatever was left pending.
fn start_reconnect(core: &Arc<Core>) {
    if core.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }
    if !core.user_connected.load(Ordering::SeqCst) {
        core.reconnecting.store(false, Ordering::SeqCst);
        return;
    }

    info!("connection lost, marking sender as reconnecting");
    core.reconnect_notify.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportReceiver, TransportSender};
    use async_trait::async_trait;
    use std::io;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};
    use tokio::sync::mpsc::Receiver;

    /// A loopback transport whose replies are scripted ahead of time and
    /// whose writes are recorded for inspection, used to drive
    /// [`MTProtoSender`] without a real socket or a real handshake.
    #[derive(Clone)]
    struct ScriptedTransport {
        sent: StdArc<StdMutex<Vec<Vec<u8>>>>,
        replies: StdArc<StdMutex<VecDeque<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        fn new() -> Self {
            Self {
                sent: StdArc::new(StdMutex::new(Vec::new())),
                replies: StdArc::new(StdMutex::new(VecDeque::new())),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        type Sender = ScriptedHalf;
        type Receiver = ScriptedHalf;

        async fn connect(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn disconnect(&mut self) {}

        async fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn recv(&mut self) -> io::Result<Vec<u8>> {
            std::future::pending().await
        }

        fn connected(&self) -> bool {
            true
        }

        fn split(self) -> (Self::Sender, Self::Receiver) {
            (ScriptedHalf(self.clone()), ScriptedHalf(self))
        }
    }

    #[derive(Clone)]
    struct ScriptedHalf(ScriptedTransport);

    #[async_trait]
    impl TransportSender for ScriptedHalf {
        async fn send(&mut self, data: &[u8]) -> io::Result<()> {
            self.0.send(data).await
        }
    }

    #[async_trait]
    impl TransportReceiver for ScriptedHalf {
        async fn recv(&mut self) -> io::Result<Vec<u8>> {
            self.0.recv().await
        }
    }

    fn authorized_core() -> (Arc<Core>, Receiver<tl::enums::Updates>) {
        let mut state = MTProtoState::new();
        state.set_auth_key(grammers_mtproto::AuthKey::from_bytes([7u8; 256]), 0);
        state.set_salt(1);

        let (updates_tx, updates_rx) = mpsc::channel(16);
        let core = Arc::new(Core {
            shared: Mutex::new(Shared::new(state)),
            notify: Notify::new(),
            user_connected: AtomicBool::new(true),
            reconnecting: AtomicBool::new(false),
            reconnect_notify: Notify::new(),
            terminal_error: Mutex::new(None),
            disconnected_notify: Notify::new(),
            updates_tx,
            last_warn: Mutex::new(None),
            tasks: Mutex::new(None),
        });
        (core, updates_rx)
    }

    #[tokio::test]
    async fn ordered_batch_wraps_predecessor_via_invoke_after() {
        let (core, _updates_rx) = authorized_core();
        let handle = SenderHandle { core: core.clone() };

        let requests = vec![
            (
                tl::functions::updates::GetState::CONSTRUCTOR_ID,
                tl::functions::updates::GetState.to_bytes(),
            ),
            (tl::functions::GetConfig::CONSTRUCTOR_ID, tl::functions::GetConfig.to_bytes()),
        ];
        let receivers = handle.send_raw_many(requests, true).unwrap();
        assert_eq!(receivers.len(), 2);

        let (batch, payload) = {
            let mut shared = core.shared.lock().unwrap();
            shared.packer.pack(&mut shared.state).unwrap()
        };
        assert_eq!(batch.len(), 2);

        let outer = tl::Message::from_bytes(&payload).unwrap();
        let container = tl::MessageContainer::from_bytes(&outer.body).unwrap();
        assert_eq!(container.messages.len(), 2);

        let wrapped = &container.messages[1].body;
        let ctor = u32::from_le_bytes(wrapped[0..4].try_into().unwrap());
        assert_eq!(ctor, tl::functions::InvokeAfterMsg::CONSTRUCTOR_ID);
    }

    #[tokio::test]
    async fn bad_server_salt_updates_state_and_resends() {
        let (core, _updates_rx) = authorized_core();
        let handle = SenderHandle { core: core.clone() };

        let request = tl::functions::GetConfig;
        let rx = handle.enqueue_one(&request).unwrap();

        let msg_id = {
            let mut shared = core.shared.lock().unwrap();
            let (batch, _payload) = shared.packer.pack(&mut shared.state).unwrap();
            let queued = shared.queue.pop_front().unwrap();
            let id = batch[0].msg_id().unwrap().0;
            shared.pending.insert(
                id,
                Pending { ctor: queued.ctor, body: queued.body, container_id: id, tx: queued.tx },
            );
            id
        };

        let notification = tl::types::BadServerSalt {
            bad_msg_id: msg_id,
            bad_msg_seqno: 0,
            error_code: 48,
            new_server_salt: 999,
        };
        handle_bad_server_salt(&core, &notification.to_bytes()[4..]);
        // `handle_bad_server_salt` expects the constructor id prefix
        // stripped off by `Identifiable::from_bytes` elsewhere; build it
        // through the real deserializer instead to stay honest:
        let mut full = Vec::new();
        tl::types::BadServerSalt::CONSTRUCTOR_ID.serialize(&mut full);
        notification.serialize(&mut full);
        // (the struct above already wrote its own id via `to_bytes`)
        let _ = full;

        assert_eq!(core.shared.lock().unwrap().state.salt(), 999);
        assert!(core.shared.lock().unwrap().pending.is_empty());
        assert_eq!(core.shared.lock().unwrap().queue.len(), 1);
        drop(rx);
    }

    #[tokio::test]
    async fn log_out_completes_on_bare_ack() {
        let (core, _updates_rx) = authorized_core();
        let handle = SenderHandle { core: core.clone() };

        let rx = handle.enqueue_one(&tl::functions::LogOut).unwrap();
        let msg_id = {
            let mut shared = core.shared.lock().unwrap();
            let (batch, _payload) = shared.packer.pack(&mut shared.state).unwrap();
            let queued = shared.queue.pop_front().unwrap();
            let id = batch[0].msg_id().unwrap().0;
            shared.pending.insert(
                id,
                Pending { ctor: queued.ctor, body: queued.body, container_id: id, tx: queued.tx },
            );
            id
        };

        let ack = tl::types::MsgsAck { msg_ids: vec![msg_id] };
        handle_msgs_ack(&core, &ack.to_bytes()[4..]);

        let body = rx.await.unwrap().unwrap();
        assert!(bool::from_bytes(&body).unwrap());
    }

    #[tokio::test]
    async fn ping_pong_clears_outstanding_ping() {
        let (core, _updates_rx) = authorized_core();
        let ping_id = 42i64;
        core.shared.lock().unwrap().ping_id = Some(ping_id);

        let pong = tl::types::Pong { msg_id: 0, ping_id };
        handle_pong(&core, &pong.to_bytes()[4..]);

        assert_eq!(core.shared.lock().unwrap().ping_id, None);
    }

    #[tokio::test]
    async fn start_reconnect_wakes_the_supervisor_once() {
        let (core, _updates_rx) = authorized_core();

        start_reconnect(&core);
        assert!(core.reconnecting.load(Ordering::SeqCst));

        // Idempotent: a second call while already reconnecting must not
        // notify again (there would be nobody left awake to consume a
        // second permit, but it also must not panic or double-schedule).
        start_reconnect(&core);
        assert!(core.reconnecting.load(Ordering::SeqCst));

        core.reconnect_notify.notified().await;
    }

    #[tokio::test]
    async fn start_reconnect_is_a_noop_when_not_user_connected() {
        let (core, _updates_rx) = authorized_core();
        core.user_connected.store(false, Ordering::SeqCst);

        start_reconnect(&core);

        assert!(!core.reconnecting.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn terminal_disconnect_completes_pending_and_queued_requests() {
        let (core, _updates_rx) = authorized_core();
        let handle = SenderHandle { core: core.clone() };

        let pending_rx = handle.enqueue_one(&tl::functions::GetConfig).unwrap();
        {
            let mut shared = core.shared.lock().unwrap();
            let (batch, _payload) = shared.packer.pack(&mut shared.state).unwrap();
            let queued = shared.queue.pop_front().unwrap();
            let id = batch[0].msg_id().unwrap().0;
            shared.pending.insert(
                id,
                Pending { ctor: queued.ctor, body: queued.body, container_id: id, tx: queued.tx },
            );
        }

        let queued_rx = handle.enqueue_one(&tl::functions::GetConfig).unwrap();

        terminal_disconnect(&core, InvocationError::InvalidBuffer);

        assert!(!core.user_connected.load(Ordering::SeqCst));
        assert!(matches!(pending_rx.await.unwrap(), Err(InvocationError::Dropped)));
        assert!(matches!(queued_rx.await.unwrap(), Err(InvocationError::Dropped)));
        assert!(matches!(
            core.terminal_error.lock().unwrap().take(),
            Some(InvocationError::InvalidBuffer)
        ));
    }
}
