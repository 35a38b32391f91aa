//! 会话引擎
//!
//! 引擎运行在独立任务中，按顺序处理调用方命令、通道事件和定时器，
//! 所有状态转换都在这一个任务里完成。
//!
//! 建立连接在单独的任务中进行，结果送回引擎的事件队列；同一时间最多一个连接尝试，
//! 重叠的重连请求合并到正在进行的尝试上。每种定时器只有一个槽位，重新设置即取消旧的。
//! 通道事件带有通道编号，旧通道的事件一律丢弃。

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    session_url, validate_username, Board, ClientMessage, Connector, GameSnapshot, GameUpdate,
    MessageKind, ServerMessage, BOARD_COLUMNS, BOARD_ROWS,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, Sleep};

use crate::config::ClientConfig;
use crate::error::{ConnectionError, Result, SessionError};
use crate::network::{
    open_transport, BoxReader, BoxWriter, Channel, ChannelEvent, ChannelId, Dispatcher, EventSink,
};
use crate::player::PlayerState;
use crate::session::events::Listeners;
use crate::session::{
    EngineState, ListenerId, MatchOutcome, MatchResult, PendingReconnect, Session, SessionEvent,
    SessionView,
};
use crate::storage::{PersistedSessionRecord, SessionStore};

const STATUS_WAITING: &str = "Waiting for an opponent...";
const STATUS_CONNECTION_LOST: &str = "Connection lost. Attempting to reconnect...";
const STATUS_RECONNECTING: &str = "Attempting to reconnect...";
const STATUS_RECONNECTED: &str = "Successfully reconnected to the game!";
const STATUS_RECONNECT_ABANDONED: &str = "Unable to reconnect to the game.";
const STATUS_CONNECT_FAILED: &str = "Failed to connect to the server.";
const STATUS_SERVER_LOST: &str = "Connection to the server was lost.";

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    NewMatch { username: String, reply: Reply },
    Reconnect { reply: Reply },
    PlaceDisc { column: usize, row: usize, reply: Reply },
    Disconnect { reply: oneshot::Sender<()> },
}

enum Internal {
    Channel(ChannelId, ChannelEvent),
    Connected {
        attempt: u64,
        result: std::result::Result<(BoxReader, BoxWriter), ConnectionError>,
    },
}

/// 连接建立后要发送的请求
#[derive(Debug, Clone)]
enum ConnectPurpose {
    NewMatch { username: String },
    Rejoin(PersistedSessionRecord),
}

impl ConnectPurpose {
    fn username(&self) -> &str {
        match self {
            ConnectPurpose::NewMatch { username } => username,
            ConnectPurpose::Rejoin(record) => &record.username,
        }
    }

    fn request(&self) -> ClientMessage {
        match self {
            ConnectPurpose::NewMatch { username } => ClientMessage::new_game(username.clone()),
            ConnectPurpose::Rejoin(record) => {
                ClientMessage::reconnect(record.username.clone(), record.room_id.clone())
            }
        }
    }
}

/// 正在进行的连接尝试
struct ConnectAttempt {
    id: u64,
    purpose: ConnectPurpose,
    waiters: Vec<Reply>,
    task: JoinHandle<()>,
}

impl ConnectAttempt {
    fn cancel(self) {
        self.task.abort();
        fail_waiters(self.waiters, ConnectionError::Cancelled);
    }
}

fn fail_waiters(waiters: Vec<Reply>, error: ConnectionError) {
    for waiter in waiters {
        let _ = waiter.send(Err(error.clone().into()));
    }
}

fn reject(reply: Reply, error: SessionError) {
    tracing::warn!("Rejected: {}", error);
    let _ = reply.send(Err(error.into()));
}

/// 单槽定时器
type Timer = Option<Pin<Box<Sleep>>>;

fn arm(timer: &mut Timer, delay: Duration) {
    *timer = Some(Box::pin(sleep(delay)));
}

/// 定时器到期；未设置时永不完成
async fn fired(timer: &mut Timer) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

/// 每个通道一份分发器：所有消息转交引擎队列
fn message_dispatcher(id: ChannelId, sink: EventSink) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    for kind in MessageKind::ALL {
        let sink = sink.clone();
        dispatcher.on(kind, move |msg| sink(id, ChannelEvent::Message(msg)));
    }
    dispatcher
}

/// 会话引擎句柄
///
/// 可以克隆给多个使用方；所有句柄释放后引擎任务断开连接并退出。
#[derive(Clone)]
pub struct SessionEngine {
    commands: mpsc::UnboundedSender<Command>,
    listeners: Listeners,
    view: watch::Receiver<SessionView>,
}

impl SessionEngine {
    /// 启动引擎任务（需要在 tokio 运行时中调用）
    ///
    /// 本地记录只在这里读取一次。
    pub fn start<C>(config: ClientConfig, connector: C, store: Arc<dyn SessionStore>) -> Self
    where
        C: Connector + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let listeners = Listeners::default();

        let persisted = store.load();
        if let Some(record) = &persisted {
            tracing::info!(
                "Found saved session: room {} as {}",
                record.room_id,
                record.username
            );
        }
        let (view_tx, view_rx) = watch::channel(SessionView {
            persisted,
            ..SessionView::default()
        });

        let actor = EngineActor {
            config,
            connector: Arc::new(connector),
            store,
            listeners: listeners.clone(),
            view: view_tx,
            internal: internal_tx,
            channel: None,
            next_channel_id: 0,
            connecting: None,
            next_attempt_id: 0,
            session: None,
            pending: None,
            retry_timer: None,
            countdown_timer: None,
            status_timer: None,
        };
        tokio::spawn(actor.run(commands_rx, internal_rx));

        Self {
            commands: commands_tx,
            listeners,
            view: view_rx,
        }
    }

    async fn call(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| SessionError::EngineStopped)?;
        rx.await.map_err(|_| SessionError::EngineStopped)?
    }

    /// 请求新对局，连接打开并发出请求后完成
    ///
    /// 只能在 Idle 或 Terminal 状态下调用；会先清除本地记录。
    pub async fn request_new_match(&self, username: &str) -> Result<()> {
        let username = username.trim().to_string();
        self.call(|reply| Command::NewMatch { username, reply }).await
    }

    /// 用本地记录重新加入对局，连接打开并发出请求后完成
    ///
    /// 正在重连时调用会合并到当前尝试（或提前进行已计划的重试）。
    pub async fn request_reconnect(&self) -> Result<()> {
        self.call(|reply| Command::Reconnect { reply }).await
    }

    /// 落子。只在轮到自己时允许；本地立即上色，等待服务端快照覆盖。
    pub async fn place_disc(&self, column: usize, row: usize) -> Result<()> {
        self.call(|reply| Command::PlaceDisc { column, row, reply })
            .await
    }

    /// 断开连接并停止重连。任何状态下都可以调用，不会失败。
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply: tx }).is_err() {
            tracing::debug!("disconnect() after engine stopped");
            return;
        }
        let _ = rx.await;
    }

    /// 订阅状态变化
    pub fn on_state_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// 取消订阅
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// 当前状态快照
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// 状态快照的接收端，可以等待变化
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn state(&self) -> EngineState {
        self.view.borrow().state
    }

    /// 本地保存的可恢复对局
    pub fn persisted_session(&self) -> Option<PersistedSessionRecord> {
        self.view.borrow().persisted.clone()
    }
}

struct EngineActor<C> {
    config: ClientConfig,
    connector: Arc<C>,
    store: Arc<dyn SessionStore>,
    listeners: Listeners,
    view: watch::Sender<SessionView>,
    internal: mpsc::UnboundedSender<Internal>,
    channel: Option<Channel>,
    next_channel_id: ChannelId,
    connecting: Option<ConnectAttempt>,
    next_attempt_id: u64,
    session: Option<Session>,
    pending: Option<PendingReconnect>,
    retry_timer: Timer,
    countdown_timer: Timer,
    status_timer: Timer,
}

impl<C: Connector + 'static> EngineActor<C> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(input) = internal.recv() => self.handle_internal(input),
                _ = fired(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.on_retry_due();
                }
                _ = fired(&mut self.countdown_timer) => {
                    self.countdown_timer = None;
                    self.on_countdown_tick();
                }
                _ = fired(&mut self.status_timer) => {
                    self.status_timer = None;
                    self.set_status(String::new());
                }
            }
        }

        tracing::debug!("All engine handles dropped, shutting down");
        if let Some(attempt) = self.connecting.take() {
            attempt.cancel();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect();
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::NewMatch { username, reply } => self.new_match(username, reply),
            Command::Reconnect { reply } => self.reconnect(reply),
            Command::PlaceDisc { column, row, reply } => self.place_disc(column, row, reply),
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
        }
    }

    fn handle_internal(&mut self, input: Internal) {
        match input {
            Internal::Channel(id, event) => self.handle_channel_event(id, event),
            Internal::Connected { attempt, result } => self.on_connected(attempt, result),
        }
    }

    // ------------------------------------------------------------------
    // 命令
    // ------------------------------------------------------------------

    fn new_match(&mut self, username: String, reply: Reply) {
        if let Err(e) = validate_username(&username) {
            reject(reply, SessionError::InvalidUsername(e.to_string()));
            return;
        }
        let state = self.state();
        if !state.can_start_match() {
            reject(
                reply,
                SessionError::InvalidState {
                    operation: "request_new_match",
                    state,
                },
            );
            return;
        }

        tracing::info!("Requesting new match as {}", username);
        self.clear_record();
        self.drop_session();
        self.pending = None;
        self.retry_timer = None;
        self.view.send_modify(|v| v.outcome = None);
        self.set_turn(false);
        self.set_match_started(false);

        // 对局结束后连接仍然打开时直接复用
        let request = ClientMessage::new_game(username.clone());
        let reused = self
            .channel
            .as_ref()
            .filter(|channel| channel.is_open())
            .map(|channel| channel.send(&request));
        match reused {
            Some(Ok(())) => {
                self.set_state(EngineState::AwaitingMatch);
                let _ = reply.send(Ok(()));
            }
            Some(Err(e)) => {
                tracing::warn!("Failed to send new match request: {}", e);
                self.set_state(EngineState::Idle);
                let _ = reply.send(Err(e));
            }
            None => {
                self.set_state(EngineState::Connecting);
                self.start_connect(ConnectPurpose::NewMatch { username }, Some(reply));
            }
        }
    }

    fn reconnect(&mut self, reply: Reply) {
        match self.state() {
            EngineState::Idle => {
                let record = self.view.borrow().persisted.clone();
                let Some(record) = record else {
                    reject(reply, SessionError::NoPersistedSession);
                    return;
                };
                tracing::info!("Rejoining room {} as {}", record.room_id, record.username);
                self.pending = Some(PendingReconnect::new(record));
                self.set_state(EngineState::Connecting);
                self.begin_rejoin_attempt(Some(reply));
            }
            EngineState::Reconnecting | EngineState::Connecting if self.pending.is_some() => {
                if let Some(attempt) = self.connecting.as_mut() {
                    tracing::debug!("Reconnect already in flight (attempt {})", attempt.id);
                    attempt.waiters.push(reply);
                } else if self.retry_timer.is_some() {
                    tracing::debug!("Reconnect requested, retrying now");
                    self.begin_rejoin_attempt(Some(reply));
                } else {
                    // 请求已发出，等待服务端快照
                    let _ = reply.send(Ok(()));
                }
            }
            state => reject(
                reply,
                SessionError::InvalidState {
                    operation: "request_reconnect",
                    state,
                },
            ),
        }
    }

    fn place_disc(&mut self, column: usize, row: usize, reply: Reply) {
        if column >= BOARD_COLUMNS || row >= BOARD_ROWS {
            reject(reply, SessionError::OutOfBounds { column, row });
            return;
        }
        let state = self.state();
        let Some(session) = self.session.as_mut() else {
            reject(reply, SessionError::NoActiveMatch);
            return;
        };
        if state != EngineState::InMatch {
            reject(
                reply,
                SessionError::InvalidState {
                    operation: "place_disc",
                    state,
                },
            );
            return;
        }
        if !session.player.is_my_turn {
            reject(reply, SessionError::NotYourTurn);
            return;
        }

        let player = &session.player;
        let msg = ClientMessage::place_disc(
            player.username.clone(),
            player.room_id.clone(),
            column,
            row,
            player.color,
        );
        let sent = match self.channel.as_ref() {
            Some(channel) => channel.send(&msg),
            None => Err(ConnectionError::NotOpen.into()),
        };
        if let Err(e) = sent {
            tracing::warn!("Failed to send move: {}", e);
            let _ = reply.send(Err(e));
            return;
        }

        tracing::info!("Placed disc at ({}, {})", column, row);
        session.player.apply_move(column, row);
        session.board.set(column, row, session.player.color.into());
        let board = session.board.clone();
        self.view.send_modify(|v| v.board = board);
        self.set_turn(false);
        let _ = reply.send(Ok(()));
    }

    fn disconnect(&mut self) {
        let mut released = false;
        if let Some(attempt) = self.connecting.take() {
            attempt.cancel();
            released = true;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect();
            released = true;
        }
        if !released {
            tracing::debug!("disconnect() with no open channel");
        }

        self.pending = None;
        self.retry_timer = None;
        self.drop_session();
        self.set_reconnecting(false);
        self.set_match_started(false);
        self.set_turn(false);
        self.set_state(EngineState::Idle);
    }

    // ------------------------------------------------------------------
    // 连接
    // ------------------------------------------------------------------

    fn start_connect(&mut self, purpose: ConnectPurpose, waiter: Option<Reply>) {
        if let Some(attempt) = self.connecting.as_mut() {
            tracing::debug!("Connect attempt {} already in flight", attempt.id);
            attempt.waiters.extend(waiter);
            return;
        }
        // 新连接建立前先释放旧通道
        if let Some(mut old) = self.channel.take() {
            old.disconnect();
        }

        self.next_attempt_id += 1;
        let id = self.next_attempt_id;
        let connector = self.connector.clone();
        let internal = self.internal.clone();
        let base = self.config.server_url.clone();
        let username = purpose.username().to_string();

        let task = tokio::spawn(async move {
            let result = match session_url(&base, &username) {
                Ok(url) => open_transport(connector.as_ref(), &url).await,
                Err(source) => Err(ConnectionError::Open {
                    url: base,
                    source: Arc::new(source),
                }),
            };
            let _ = internal.send(Internal::Connected { attempt: id, result });
        });

        tracing::debug!("Connect attempt {} started", id);
        self.connecting = Some(ConnectAttempt {
            id,
            purpose,
            waiters: waiter.into_iter().collect(),
            task,
        });
    }

    fn on_connected(
        &mut self,
        attempt: u64,
        result: std::result::Result<(BoxReader, BoxWriter), ConnectionError>,
    ) {
        if self.connecting.as_ref().map(|a| a.id) != Some(attempt) {
            tracing::debug!("Discarding result of stale connect attempt {}", attempt);
            return;
        }
        let Some(ConnectAttempt {
            purpose, waiters, ..
        }) = self.connecting.take()
        else {
            return;
        };

        let error = match result {
            Ok((reader, writer)) => {
                let channel = self.open_channel(reader, writer);
                let sent = channel.send(&purpose.request());
                self.channel = Some(channel);
                match sent {
                    Ok(()) => {
                        let state = match purpose {
                            ConnectPurpose::NewMatch { .. } => EngineState::AwaitingMatch,
                            ConnectPurpose::Rejoin(_) => EngineState::Reconnecting,
                        };
                        self.set_state(state);
                        for waiter in waiters {
                            let _ = waiter.send(Ok(()));
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to send request on new channel: {}", e);
                        self.channel = None;
                        ConnectionError::NotOpen
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{}", e);
                e
            }
        };

        match purpose {
            ConnectPurpose::NewMatch { .. } => {
                // 新对局连接失败只提示一次，不自动重试
                self.set_state(EngineState::Idle);
                self.set_status(STATUS_CONNECT_FAILED);
            }
            ConnectPurpose::Rejoin(_) => self.rejoin_failed(),
        }
        fail_waiters(waiters, error);
    }

    fn open_channel(&mut self, reader: BoxReader, writer: BoxWriter) -> Channel {
        self.next_channel_id += 1;
        let id = self.next_channel_id;
        let internal = self.internal.clone();
        let sink: EventSink = Arc::new(move |id, event| {
            let _ = internal.send(Internal::Channel(id, event));
        });
        Channel::spawn(id, reader, writer, message_dispatcher(id, sink.clone()), sink)
    }

    fn handle_channel_event(&mut self, id: ChannelId, event: ChannelEvent) {
        if self.channel.as_ref().map(Channel::id) != Some(id) {
            tracing::debug!("Ignoring event from stale channel {}", id);
            return;
        }
        match event {
            ChannelEvent::Opened => tracing::debug!("Channel {} ready", id),
            ChannelEvent::Message(msg) => self.handle_message(msg),
            ChannelEvent::Errored(e) => tracing::warn!("Channel {} error: {}", id, e),
            ChannelEvent::Closed { code, reason } => {
                tracing::info!("Channel {} closed ({}): {}", id, code, reason);
                self.channel = None;
                self.on_channel_closed();
            }
        }
    }

    fn on_channel_closed(&mut self) {
        match self.state() {
            EngineState::InMatch => self.begin_reconnect(),
            EngineState::Reconnecting => self.rejoin_failed(),
            EngineState::AwaitingMatch => {
                self.set_state(EngineState::Idle);
                self.set_status(STATUS_SERVER_LOST);
            }
            EngineState::Terminal => self.set_state(EngineState::Idle),
            EngineState::Idle | EngineState::Connecting => {}
        }
    }

    // ------------------------------------------------------------------
    // 重连
    // ------------------------------------------------------------------

    /// 对局中连接意外断开
    fn begin_reconnect(&mut self) {
        let Some(session) = &self.session else {
            self.set_state(EngineState::Idle);
            return;
        };
        let record = session.player.record();
        tracing::warn!("Connection lost during match in room {}", record.room_id);

        self.pending = Some(PendingReconnect::new(record));
        self.set_state(EngineState::Reconnecting);
        self.set_reconnecting(true);
        self.set_status(STATUS_CONNECTION_LOST);
        self.schedule_retry(self.config.reconnect.initial_delay());
    }

    fn schedule_retry(&mut self, delay: Duration) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        pending.next_retry_at = Some(Instant::now() + delay);
        tracing::debug!("Reconnect to room {} scheduled in {:?}", pending.room_id, delay);
        arm(&mut self.retry_timer, delay);
    }

    fn on_retry_due(&mut self) {
        if self.state() != EngineState::Reconnecting || self.pending.is_none() {
            return;
        }
        self.begin_rejoin_attempt(None);
    }

    fn begin_rejoin_attempt(&mut self, waiter: Option<Reply>) {
        let Some(pending) = self.pending.as_mut() else {
            if let Some(waiter) = waiter {
                reject(waiter, SessionError::NoPersistedSession);
            }
            return;
        };
        if !self.config.reconnect.allows(pending.attempt_count + 1) {
            tracing::warn!(
                "Giving up on room {} after {} attempts",
                pending.room_id,
                pending.attempt_count
            );
            self.abandon_reconnect(STATUS_RECONNECT_ABANDONED.to_string());
            fail_waiters(waiter.into_iter().collect(), ConnectionError::Cancelled);
            return;
        }

        pending.attempt_count += 1;
        pending.next_retry_at = None;
        tracing::info!(
            "Reconnect attempt {} for room {}",
            pending.attempt_count,
            pending.room_id
        );
        let record = pending.record();

        self.retry_timer = None;
        self.set_reconnecting(true);
        self.set_status(STATUS_RECONNECTING);
        self.start_connect(ConnectPurpose::Rejoin(record), waiter);
    }

    /// 一次重连尝试失败（连接失败或在收到快照前断开）
    fn rejoin_failed(&mut self) {
        let attempts = self.pending.as_ref().map_or(0, |p| p.attempt_count);
        if !self.config.reconnect.allows(attempts + 1) {
            tracing::warn!("Giving up after {} reconnect attempts", attempts);
            self.abandon_reconnect(STATUS_RECONNECT_ABANDONED.to_string());
            return;
        }

        let delay = self.config.reconnect.retry_delay();
        self.set_state(EngineState::Reconnecting);
        self.set_reconnecting(true);
        self.set_status(format!(
            "Failed to reconnect. Trying again in {} seconds...",
            delay.as_secs()
        ));
        self.schedule_retry(delay);
    }

    /// 放弃重连：清除会话和本地记录，回到 Idle
    fn abandon_reconnect(&mut self, status: String) {
        if let Some(attempt) = self.connecting.take() {
            attempt.cancel();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect();
        }
        self.pending = None;
        self.retry_timer = None;
        self.drop_session();
        self.clear_record();
        self.set_reconnecting(false);
        self.set_match_started(false);
        self.set_turn(false);
        self.set_state(EngineState::Idle);
        self.set_status(status);
    }

    // ------------------------------------------------------------------
    // 服务端消息
    // ------------------------------------------------------------------

    fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::NewGameResponse(response) => {
                tracing::info!("Room ID: {}", response.room_id);
                if self.state() == EngineState::AwaitingMatch {
                    self.set_status(STATUS_WAITING);
                }
            }
            ServerMessage::GameStarted(snapshot) => {
                let state = self.state();
                if state != EngineState::AwaitingMatch {
                    tracing::warn!("Ignoring game_started in state {}", state);
                    return;
                }
                self.set_status(String::new());
                self.establish_session(snapshot);
            }
            ServerMessage::GameRejoined(snapshot) => {
                if self.pending.take().is_none() {
                    tracing::warn!("Ignoring game_rejoined without a pending rejoin");
                    return;
                }
                self.retry_timer = None;
                self.establish_session(snapshot);
                self.set_reconnecting(false);
                self.clear_countdown();
                self.set_transient_status(STATUS_RECONNECTED.to_string());
            }
            ServerMessage::GameUpdate(update) => self.apply_update(update),
            ServerMessage::GameOver(over) => self.finish_match(over.winner, over.message),
            ServerMessage::PlayerDisconnected(notice) => {
                if self.state() != EngineState::InMatch {
                    tracing::debug!("Ignoring player_disconnected outside a match");
                    return;
                }
                tracing::info!("Opponent disconnected: {}", notice.message);
                self.set_status(notice.message);
                self.start_countdown();
            }
            ServerMessage::PlayerRejoined(notice) => {
                tracing::info!("{} rejoined", notice.username);
                self.clear_countdown();
                self.set_transient_status(format!("{} has rejoined the game!", notice.username));
            }
            ServerMessage::Error(error) => self.handle_server_error(error.error),
            ServerMessage::Info(info) => tracing::info!("Server info: {}", info.info),
            ServerMessage::ConnectionAck(ack) => {
                tracing::debug!("Connection acknowledged: {:?}", ack.message)
            }
        }
    }

    /// 服务端快照整体替换内存中的会话
    fn establish_session(&mut self, snapshot: GameSnapshot) {
        let player = PlayerState::from_snapshot(&snapshot, Arc::new(self.listeners.clone()));
        tracing::info!(
            "Match in room {}: {} ({}) vs {}",
            player.room_id(),
            player.username(),
            player.color(),
            player.opponent_username()
        );
        let mine = player.is_my_turn();

        self.save_record(player.record());
        self.session = Some(Session {
            player: player.clone(),
            board: snapshot.grid_data.clone(),
        });
        self.view.send_modify(|v| {
            v.player = Some(player);
            v.outcome = None;
        });
        self.set_board(snapshot.grid_data);
        self.set_turn(mine);
        self.set_match_started(true);
        self.set_state(EngineState::InMatch);
    }

    fn apply_update(&mut self, update: GameUpdate) {
        let finished = update.is_finished();
        if self.session.is_none() {
            if finished && self.pending.is_some() {
                // 重新加入时对局已经结束，服务端只回结果
                self.finish_match(update.winner, update.message);
            } else {
                tracing::debug!("Ignoring game_update without an active match");
            }
            return;
        }

        if let Some(board) = update.grid_data {
            self.set_board(board);
        }
        let mine = match (self.session.as_mut(), update.current_turn.as_deref()) {
            (Some(session), Some(current)) => Some(session.player.set_turn_from(current)),
            _ => None,
        };
        if let Some(mine) = mine {
            self.set_turn(mine);
        }
        if finished {
            self.finish_match(update.winner, update.message);
        }
    }

    /// 对局结束：只处理第一次，重复的结束消息被忽略
    ///
    /// 没有内存中的会话时，以等待重新加入的记录作为本方身份。
    fn finish_match(&mut self, winner: Option<String>, message: Option<String>) {
        let (username, room_id) = match (self.session.take(), self.pending.as_ref()) {
            (Some(session), _) => (session.player.username, session.player.room_id),
            (None, Some(pending)) => (pending.username.clone(), pending.room_id.clone()),
            (None, None) => {
                tracing::debug!("Ignoring terminal message without an active match");
                return;
            }
        };
        let result = MatchResult::from_winner(winner.as_deref(), &username);
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| result.message().to_string());
        tracing::info!("Match in room {} finished: {:?}", room_id, result);

        let outcome = MatchOutcome {
            result,
            winner,
            message,
        };
        self.pending = None;
        self.retry_timer = None;
        self.clear_record();
        self.set_turn(false);
        self.set_reconnecting(false);
        self.set_state(EngineState::Terminal);
        self.view.send_modify(|v| {
            v.player = None;
            v.outcome = Some(outcome.clone());
        });
        self.set_status(outcome.message.clone());
        self.emit(SessionEvent::Outcome(outcome));
    }

    fn handle_server_error(&mut self, error: String) {
        tracing::error!("Server error: {}", error);
        self.emit(SessionEvent::ServerError(error.clone()));
        if self.pending.is_some() {
            // 服务端拒绝重新加入（房间已不存在）
            self.abandon_reconnect(error);
        } else {
            self.set_status(error);
        }
    }

    // ------------------------------------------------------------------
    // 倒计时与状态文字
    // ------------------------------------------------------------------

    fn start_countdown(&mut self) {
        let ticks = self.config.grace_countdown_ticks;
        if ticks == 0 {
            return;
        }
        self.set_countdown(Some(ticks));
        arm(&mut self.countdown_timer, self.config.countdown_tick());
    }

    fn on_countdown_tick(&mut self) {
        let remaining = self.view.borrow().countdown.map(|n| n.saturating_sub(1));
        match remaining {
            Some(0) | None => self.clear_countdown(),
            Some(n) => {
                self.set_countdown(Some(n));
                arm(&mut self.countdown_timer, self.config.countdown_tick());
            }
        }
    }

    fn clear_countdown(&mut self) {
        self.countdown_timer = None;
        if self.view.borrow().countdown.is_some() {
            self.set_countdown(None);
        }
    }

    fn set_countdown(&mut self, value: Option<u32>) {
        self.view.send_modify(|v| v.countdown = value);
        self.emit(SessionEvent::CountdownChanged(value));
    }

    fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        self.status_timer = None;
        self.view.send_modify(|v| v.status = status.clone());
        self.emit(SessionEvent::StatusChanged(status));
    }

    /// 显示一段时间后自动清除
    fn set_transient_status(&mut self, status: String) {
        self.set_status(status);
        arm(&mut self.status_timer, self.config.status_clear_delay());
    }

    // ------------------------------------------------------------------
    // 状态与通知
    // ------------------------------------------------------------------

    fn state(&self) -> EngineState {
        self.view.borrow().state
    }

    fn emit(&self, event: SessionEvent) {
        self.listeners.emit(&event);
    }

    fn set_state(&mut self, state: EngineState) {
        let previous = self.state();
        if previous == state {
            return;
        }
        tracing::info!("Session state: {} -> {}", previous, state);
        if previous == EngineState::InMatch {
            self.clear_countdown();
        }
        self.view.send_modify(|v| v.state = state);
        self.emit(SessionEvent::StateChanged(state));
    }

    /// 释放内存中的会话（棋盘保留到下一次快照）
    fn drop_session(&mut self) {
        self.session = None;
        self.view.send_modify(|v| v.player = None);
    }

    fn set_board(&mut self, board: Board) {
        if let Some(session) = self.session.as_mut() {
            session.board = board.clone();
        }
        self.view.send_modify(|v| v.board = board.clone());
        self.emit(SessionEvent::GridChanged(board));
    }

    fn set_turn(&mut self, mine: bool) {
        if let Some(session) = self.session.as_mut() {
            session.player.is_my_turn = mine;
        }
        if self.view.borrow().is_my_turn == mine {
            return;
        }
        self.view.send_modify(|v| {
            v.is_my_turn = mine;
            if let Some(player) = v.player.as_mut() {
                player.is_my_turn = mine;
            }
        });
        self.emit(SessionEvent::TurnChanged(mine));
    }

    fn set_reconnecting(&mut self, value: bool) {
        if self.view.borrow().reconnecting == value {
            return;
        }
        self.view.send_modify(|v| v.reconnecting = value);
        self.emit(SessionEvent::ReconnectingChanged(value));
    }

    fn set_match_started(&mut self, value: bool) {
        if self.view.borrow().match_started == value {
            return;
        }
        self.view.send_modify(|v| v.match_started = value);
        self.emit(SessionEvent::MatchStartedChanged(value));
    }

    fn save_record(&mut self, record: PersistedSessionRecord) {
        if let Err(e) = self.store.save(&record) {
            tracing::warn!("Failed to save session state: {:#}", e);
        }
        self.view.send_modify(|v| v.persisted = Some(record));
    }

    fn clear_record(&mut self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear session state: {:#}", e);
        }
        self.view.send_modify(|v| v.persisted = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_slot() {
        let mut timer: Timer = None;
        let idle = tokio::time::timeout(Duration::from_secs(60), fired(&mut timer)).await;
        assert!(idle.is_err());

        let start = Instant::now();
        arm(&mut timer, Duration::from_secs(2));
        arm(&mut timer, Duration::from_secs(5));
        fired(&mut timer).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_dispatcher_covers_every_kind() {
        let sink: EventSink = Arc::new(|_, _| {});
        let dispatcher = message_dispatcher(1, sink);
        assert_eq!(dispatcher.len(), MessageKind::ALL.len());
    }

    #[test]
    fn test_connect_purpose_request() {
        let purpose = ConnectPurpose::Rejoin(PersistedSessionRecord::new("R1", "alice"));
        let msg = purpose.request();
        assert_eq!(purpose.username(), "alice");
        assert_eq!(msg.username(), "alice");
        assert_eq!(msg.kind(), protocol::ClientMessageType::Reconnect);
    }
}
