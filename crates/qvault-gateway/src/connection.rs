use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use qvault_chat::thread::validate_outgoing;
use qvault_chat::{
    ChangeFeed, ChatError, ChatService, ChatSession, DeliveryChannel, DeliveryEvent, Directory,
    DirectoryToken, Inbound, MessageStore, ProfileStore, ThreadToken, UnreadToken,
};
use qvault_types::api::Claims;
use qvault_types::events::{GatewayCommand, GatewayEvent};
use qvault_types::models::{Message, Profile, Viewer};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Sink = SplitSink<WebSocket, WsMessage>;

/// Results of requests the session loop spawned, posted back so the loop
/// stays the only writer of session state.
pub(crate) enum Completion {
    Loaded {
        token: ThreadToken,
        result: Result<Vec<Message>, ChatError>,
    },
    Sent {
        recipient_id: Uuid,
        content: String,
        result: Result<Message, ChatError>,
    },
    MarkedRead {
        token: ThreadToken,
        result: Result<usize, ChatError>,
    },
    Directory {
        token: DirectoryToken,
        result: Result<Directory, ChatError>,
    },
    Unread {
        token: UnreadToken,
        result: Result<u32, ChatError>,
    },
    Contact {
        token: UnreadToken,
        result: Result<(Option<Profile>, u32), ChatError>,
    },
}

/// Handle a single WebSocket connection: Identify handshake, then the
/// session loop until the socket closes.
pub async fn handle_connection<S, F>(socket: WebSocket, chat: ChatService<S, F>, jwt_secret: String)
where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    let viewer = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(viewer) => viewer,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", viewer.display_name, viewer.id);

    if let Err(e) = chat.sync_profile(&viewer).await {
        warn!("Could not record profile for {}: {}", viewer.id, e);
    }

    let ready = GatewayEvent::Ready {
        user_id: viewer.id,
        display_name: viewer.display_name.clone(),
        role: viewer.role,
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    run_session(sender, receiver, chat, viewer.clone()).await;
    info!("{} ({}) disconnected from gateway", viewer.display_name, viewer.id);
}

/// Attach live delivery, then read the directory. Returns the greeting the
/// client gets before any command is handled.
pub(crate) async fn start_session<S, F>(
    chat: &ChatService<S, F>,
    viewer: Viewer,
) -> (Option<DeliveryChannel<F>>, ChatSession, Vec<GatewayEvent>)
where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    // Subscribed first: a message landing in between is in the snapshot and
    // its delivery only triggers a re-read of the stored count.
    let delivery = match chat.subscribe(&viewer) {
        Ok(channel) => Some(channel),
        Err(e) => {
            warn!("{} ({}) has no live updates: {}", viewer.display_name, viewer.id, e);
            None
        }
    };

    let directory = chat.directory(Some(&viewer)).await.unwrap_or_else(|e| {
        warn!("Directory for {} failed: {}", viewer.id, e);
        Directory::default()
    });
    let session = ChatSession::new(viewer, directory);

    let greeting = vec![
        GatewayEvent::Directory {
            entries: session.directory().entries().to_vec(),
        },
        GatewayEvent::LiveUpdates {
            active: delivery.is_some(),
        },
    ];
    (delivery, session, greeting)
}

async fn run_session<S, F>(
    mut sender: Sink,
    mut receiver: SplitStream<WebSocket>,
    chat: ChatService<S, F>,
    viewer: Viewer,
) where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    let (mut delivery, mut session, greeting) = start_session(&chat, viewer).await;
    for event in &greeting {
        if !send_event(&mut sender, event).await {
            return;
        }
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    'session: loop {
        let outgoing = tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&mut session, &chat, &done_tx, cmd),
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} bad command: {} -- raw: {}", session.viewer().id, e, raw);
                        Vec::new()
                    }
                },
                Some(Ok(WsMessage::Pong(_))) => {
                    pong_received = true;
                    Vec::new()
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break 'session,
                Some(Ok(_)) => Vec::new(),
            },
            event = next_delivery(&mut delivery) => handle_delivery(&mut session, &chat, &done_tx, event),
            Some(done) = done_rx.recv() => apply_completion(&mut session, &chat, &done_tx, done),
            _ = heartbeat.tick() => {
                if pong_received {
                    pong_received = false;
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break 'session;
                    }
                }
                if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break 'session;
                }
                Vec::new()
            }
        };

        for event in &outgoing {
            if !send_event(&mut sender, event).await {
                break 'session;
            }
        }
    }

    if let Some(mut channel) = delivery {
        channel.close();
    }
}

async fn next_delivery<F: ChangeFeed>(delivery: &mut Option<DeliveryChannel<F>>) -> DeliveryEvent {
    match delivery {
        Some(channel) => channel.next().await,
        None => std::future::pending().await,
    }
}

pub(crate) fn handle_command<S, F>(
    session: &mut ChatSession,
    chat: &ChatService<S, F>,
    done: &mpsc::UnboundedSender<Completion>,
    cmd: GatewayCommand,
) -> Vec<GatewayEvent>
where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::OpenThread { counterpart_id } => {
            let token = session.open(counterpart_id);
            spawn_load(chat, session.viewer(), token, done);
        }

        GatewayCommand::CloseThread => session.close(),

        GatewayCommand::SendMessage { recipient_id, content } => {
            let viewer = session.viewer().clone();
            if let Err(e) = validate_outgoing(viewer.id, recipient_id, &content) {
                return vec![GatewayEvent::SendRejected {
                    recipient_id,
                    reason: e.to_string(),
                }];
            }

            let chat = chat.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let result = chat.send(&viewer, recipient_id, &content).await;
                let _ = done.send(Completion::Sent {
                    recipient_id,
                    content,
                    result,
                });
            });
        }

        GatewayCommand::RefreshDirectory => spawn_directory(chat, session, done),
    }
    Vec::new()
}

pub(crate) fn handle_delivery<S, F>(
    session: &mut ChatSession,
    chat: &ChatService<S, F>,
    done: &mpsc::UnboundedSender<Completion>,
    event: DeliveryEvent,
) -> Vec<GatewayEvent>
where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    match event {
        DeliveryEvent::Message(message) => match session.deliver(message.clone()) {
            Inbound::Appended => {
                // The viewer is looking at this thread; keep it read.
                if let Some(token) = session.current_token() {
                    let chat = chat.clone();
                    let viewer = session.viewer().clone();
                    let done = done.clone();
                    tokio::spawn(async move {
                        let result = chat.mark_read(&viewer, token.counterpart_id()).await;
                        let _ = done.send(Completion::MarkedRead { token, result });
                    });
                }
                vec![GatewayEvent::MessageAppended { message }]
            }
            Inbound::Duplicate | Inbound::Ignored => Vec::new(),
            Inbound::Unread(token) => {
                let chat = chat.clone();
                let viewer = session.viewer().clone();
                let done = done.clone();
                tokio::spawn(async move {
                    let result = chat.unread_count(&viewer, token.counterpart_id()).await;
                    let _ = done.send(Completion::Unread { token, result });
                });
                Vec::new()
            }
            Inbound::NewContact(token) => {
                let chat = chat.clone();
                let viewer = session.viewer().clone();
                let done = done.clone();
                tokio::spawn(async move {
                    let counterpart_id = token.counterpart_id();
                    let result = async {
                        let profile = chat.profile(counterpart_id).await?;
                        let unread = chat.unread_count(&viewer, counterpart_id).await?;
                        Ok::<_, ChatError>((profile, unread))
                    }
                    .await;
                    let _ = done.send(Completion::Contact { token, result });
                });
                Vec::new()
            }
        },
        DeliveryEvent::Resumed => {
            // Anything sent while detached was missed; reload.
            if let Some(token) = session.current_token() {
                spawn_load(chat, session.viewer(), token, done);
            }
            spawn_directory(chat, session, done);
            vec![GatewayEvent::LiveUpdates { active: true }]
        }
        DeliveryEvent::Lost(e) => {
            warn!("{} lost live updates: {}", session.viewer().id, e);
            vec![GatewayEvent::LiveUpdates { active: false }]
        }
    }
}

pub(crate) fn apply_completion<S, F>(
    session: &mut ChatSession,
    chat: &ChatService<S, F>,
    done: &mpsc::UnboundedSender<Completion>,
    completion: Completion,
) -> Vec<GatewayEvent>
where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    match completion {
        Completion::Loaded { token, result } => match result {
            Ok(messages) => {
                if !session.apply_loaded(token, messages) {
                    return Vec::new();
                }
                let messages = session
                    .active_thread()
                    .map(|view| view.messages().to_vec())
                    .unwrap_or_default();
                vec![
                    GatewayEvent::ThreadLoaded {
                        counterpart_id: token.counterpart_id(),
                        messages,
                    },
                    GatewayEvent::UnreadChanged {
                        counterpart_id: token.counterpart_id(),
                        unread_count: 0,
                    },
                ]
            }
            Err(e) if session.is_current(&token) => {
                warn!("Loading thread with {} failed: {}", token.counterpart_id(), e);
                vec![GatewayEvent::ThreadLoadFailed {
                    counterpart_id: token.counterpart_id(),
                    reason: e.to_string(),
                }]
            }
            Err(e) => {
                debug!("Ignoring failed load for abandoned thread: {}", e);
                Vec::new()
            }
        },

        Completion::Sent {
            recipient_id,
            content,
            result,
        } => match result {
            Ok(message) => {
                if session.apply_sent(message.clone()) {
                    vec![GatewayEvent::MessageAppended { message }]
                } else {
                    Vec::new()
                }
            }
            Err(ChatError::Validation(e)) => vec![GatewayEvent::SendRejected {
                recipient_id,
                reason: e.to_string(),
            }],
            Err(ChatError::SendFailed { content, reason }) => vec![GatewayEvent::SendFailed {
                recipient_id,
                content,
                reason,
            }],
            Err(e) => vec![GatewayEvent::SendFailed {
                recipient_id,
                content,
                reason: e.to_string(),
            }],
        },

        Completion::MarkedRead { token, result } => {
            match result {
                Ok(_) => {
                    session.apply_marked_read(token);
                }
                Err(e) => warn!("Marking thread with {} read failed: {}", token.counterpart_id(), e),
            }
            Vec::new()
        }

        Completion::Directory { token, result } => match result {
            Ok(directory) => {
                if !session.apply_directory(token, directory) {
                    return Vec::new();
                }
                vec![GatewayEvent::Directory {
                    entries: session.directory().entries().to_vec(),
                }]
            }
            Err(e) => {
                warn!("Directory refresh for {} failed: {}", session.viewer().id, e);
                Vec::new()
            }
        },

        Completion::Unread { token, result } => match result {
            Ok(unread) => match session.apply_unread(token, unread) {
                Some(unread_count) => vec![GatewayEvent::UnreadChanged {
                    counterpart_id: token.counterpart_id(),
                    unread_count,
                }],
                None => Vec::new(),
            },
            Err(e) => {
                warn!("Unread count for {} failed: {}", token.counterpart_id(), e);
                Vec::new()
            }
        },

        Completion::Contact { token, result } => match result {
            Ok((profile, unread)) => {
                let profile = profile.unwrap_or_else(|| Profile {
                    id: token.counterpart_id(),
                    full_name: None,
                    school: None,
                    role: session.viewer().role.counterpart(),
                });
                match session.add_contact(token, &profile, unread) {
                    Some(entry) => vec![GatewayEvent::ContactAdded { entry }],
                    None => Vec::new(),
                }
            }
            Err(e) => {
                warn!(
                    "Lookup of new contact {} failed, refreshing directory: {}",
                    token.counterpart_id(),
                    e
                );
                spawn_directory(chat, session, done);
                Vec::new()
            }
        },
    }
}

fn spawn_load<S, F>(
    chat: &ChatService<S, F>,
    viewer: &Viewer,
    token: ThreadToken,
    done: &mpsc::UnboundedSender<Completion>,
) where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    let chat = chat.clone();
    let viewer = viewer.clone();
    let done = done.clone();
    tokio::spawn(async move {
        let result = chat.open_thread(&viewer, token.counterpart_id()).await;
        let _ = done.send(Completion::Loaded { token, result });
    });
}

fn spawn_directory<S, F>(
    chat: &ChatService<S, F>,
    session: &mut ChatSession,
    done: &mpsc::UnboundedSender<Completion>,
) where
    S: MessageStore + ProfileStore + 'static,
    F: ChangeFeed + Clone + 'static,
{
    let token = session.request_directory();
    let chat = chat.clone();
    let viewer = session.viewer().clone();
    let done = done.clone();
    tokio::spawn(async move {
        let result = chat.directory(Some(&viewer)).await;
        let _ = done.send(Completion::Directory { token, result });
    });
}

async fn send_event(sender: &mut Sink, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(WsMessage::Text(text.into())).await.is_ok()
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Viewer> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let WsMessage::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(Viewer::from(token_data.claims));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use qvault_chat::{ReconnectPolicy, SqliteStore, Subscription};
    use qvault_db::Database;
    use qvault_types::models::Role;

    use crate::dispatcher::Dispatcher;

    type Chat<F = Dispatcher> = ChatService<SqliteStore, F>;

    fn chat_with<F: ChangeFeed + Clone>(feed: F) -> Chat<F> {
        let store = SqliteStore::new(Arc::new(Database::open_in_memory().unwrap()));
        ChatService::new(store, feed, ReconnectPolicy::default())
    }

    fn chat() -> Chat {
        chat_with(Dispatcher::default())
    }

    async fn enrol<F: ChangeFeed + Clone>(chat: &Chat<F>, name: &str, role: Role) -> Viewer {
        let viewer = Viewer {
            id: Uuid::new_v4(),
            role,
            display_name: name.to_string(),
            school: None,
        };
        chat.sync_profile(&viewer).await.unwrap();
        viewer
    }

    /// Feed that refuses every subscription.
    #[derive(Clone)]
    struct OfflineFeed;

    impl ChangeFeed for OfflineFeed {
        fn subscribe(&self, _: Uuid) -> Result<Subscription, ChatError> {
            Err(ChatError::Subscription("feed offline".into()))
        }

        fn publish(&self, _: &Message) {}
    }

    #[tokio::test]
    async fn switching_threads_discards_the_late_load() {
        let chat = chat();
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;
        let first = enrol(&chat, "Ayanda", Role::Student).await;
        let second = enrol(&chat, "Busi", Role::Student).await;
        chat.send(&first, teacher.id, "from Ayanda").await.unwrap();
        chat.send(&second, teacher.id, "from Busi").await.unwrap();

        let mut session = ChatSession::new(teacher.clone(), chat.directory(Some(&teacher)).await.unwrap());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: first.id });
        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: second.id });

        let mut loaded = Vec::new();
        for _ in 0..2 {
            let done = done_rx.recv().await.unwrap();
            loaded.extend(apply_completion(&mut session, &chat, &done_tx, done));
        }

        let threads: Vec<Uuid> = loaded
            .iter()
            .filter_map(|e| match e {
                GatewayEvent::ThreadLoaded { counterpart_id, .. } => Some(*counterpart_id),
                _ => None,
            })
            .collect();
        assert_eq!(threads, vec![second.id]);
    }

    #[tokio::test]
    async fn blank_message_is_rejected_without_a_request() {
        let chat = chat();
        let student = enrol(&chat, "Ayanda", Role::Student).await;
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;
        let mut session = ChatSession::new(student.clone(), Directory::default());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let events = handle_command(
            &mut session,
            &chat,
            &done_tx,
            GatewayCommand::SendMessage {
                recipient_id: teacher.id,
                content: "  ".into(),
            },
        );
        assert!(matches!(events.as_slice(), [GatewayEvent::SendRejected { .. }]));
        assert!(done_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_lands_in_a_thread_reopened_before_it_finished() {
        let chat = chat();
        let student = enrol(&chat, "Ayanda", Role::Student).await;
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;
        let other = enrol(&chat, "Ms Khumalo", Role::Teacher).await;
        let mut session = ChatSession::new(student.clone(), chat.directory(Some(&student)).await.unwrap());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: teacher.id });
        handle_command(
            &mut session,
            &chat,
            &done_tx,
            GatewayCommand::SendMessage {
                recipient_id: teacher.id,
                content: "Is the memo out?".into(),
            },
        );
        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: other.id });
        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: teacher.id });

        // Three loads and one send, in whatever order they finish.
        for _ in 0..4 {
            let done = done_rx.recv().await.unwrap();
            apply_completion(&mut session, &chat, &done_tx, done);
        }

        let view = session.active_thread().unwrap();
        assert_eq!(view.counterpart_id(), teacher.id);
        assert_eq!(view.len(), 1);
        assert_eq!(view.messages()[0].content, "Is the memo out?");
    }

    #[tokio::test]
    async fn live_message_appends_and_is_marked_read() {
        let chat = chat();
        let student = enrol(&chat, "Ayanda", Role::Student).await;
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;

        let mut inbox = chat.subscribe(&teacher).unwrap();
        let mut session = ChatSession::new(teacher.clone(), chat.directory(Some(&teacher)).await.unwrap());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: student.id });
        let done = done_rx.recv().await.unwrap();
        apply_completion(&mut session, &chat, &done_tx, done);

        chat.send(&student, teacher.id, "Can you help with Q3?").await.unwrap();
        let event = inbox.next().await;
        let events = handle_delivery(&mut session, &chat, &done_tx, event);
        assert!(matches!(events.as_slice(), [GatewayEvent::MessageAppended { .. }]));

        let done = done_rx.recv().await.unwrap();
        apply_completion(&mut session, &chat, &done_tx, done);
        assert!(session.active_thread().unwrap().messages()[0].is_read);
        assert_eq!(chat.unread_count(&teacher, student.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn message_racing_the_first_directory_is_counted_once() {
        let chat = chat();
        let student = enrol(&chat, "Ayanda", Role::Student).await;
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;
        chat.send(&student, teacher.id, "first").await.unwrap();

        let mut inbox = chat.subscribe(&teacher).unwrap();
        chat.send(&student, teacher.id, "second").await.unwrap();
        let mut session = ChatSession::new(teacher.clone(), chat.directory(Some(&teacher)).await.unwrap());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let event = inbox.next().await;
        assert!(handle_delivery(&mut session, &chat, &done_tx, event).is_empty());
        let done = done_rx.recv().await.unwrap();
        let events = apply_completion(&mut session, &chat, &done_tx, done);

        match events.as_slice() {
            [GatewayEvent::UnreadChanged { counterpart_id, unread_count }] => {
                assert_eq!(*counterpart_id, student.id);
                assert_eq!(*unread_count, 2);
            }
            other => panic!("unexpected events: {:?}", other),
        }
        assert_eq!(session.directory().unread_count(student.id), Some(2));
    }

    #[tokio::test]
    async fn first_message_from_a_new_student_adds_a_contact() {
        let chat = chat();
        let student = enrol(&chat, "Zanele", Role::Student).await;
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;

        let mut inbox = chat.subscribe(&teacher).unwrap();
        let mut session = ChatSession::new(teacher.clone(), chat.directory(Some(&teacher)).await.unwrap());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        chat.send(&student, teacher.id, "Hello sir").await.unwrap();
        let event = inbox.next().await;
        assert!(handle_delivery(&mut session, &chat, &done_tx, event).is_empty());

        let done = done_rx.recv().await.unwrap();
        let events = apply_completion(&mut session, &chat, &done_tx, done);
        match events.as_slice() {
            [GatewayEvent::ContactAdded { entry }] => {
                assert_eq!(entry.id, student.id);
                assert_eq!(entry.unread_count, 1);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn without_live_updates_threads_still_load() {
        let chat = chat_with(OfflineFeed);
        let student = enrol(&chat, "Ayanda", Role::Student).await;
        let teacher = enrol(&chat, "Mr Dube", Role::Teacher).await;
        chat.send(&student, teacher.id, "Can you help with Q3?").await.unwrap();

        let (delivery, mut session, greeting) = start_session(&chat, teacher.clone()).await;
        assert!(delivery.is_none());
        assert!(matches!(
            greeting.as_slice(),
            [GatewayEvent::Directory { entries }, GatewayEvent::LiveUpdates { active: false }]
                if entries.len() == 1 && entries[0].unread_count == 1
        ));

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        handle_command(&mut session, &chat, &done_tx, GatewayCommand::OpenThread { counterpart_id: student.id });
        let done = done_rx.recv().await.unwrap();
        let events = apply_completion(&mut session, &chat, &done_tx, done);

        match events.as_slice() {
            [GatewayEvent::ThreadLoaded { counterpart_id, messages }, GatewayEvent::UnreadChanged { unread_count: 0, .. }] => {
                assert_eq!(*counterpart_id, student.id);
                assert_eq!(messages.len(), 1);
                assert!(messages[0].is_read);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }
}
