//! One live chat connection bound to one room.
//!
//! A session runs two tasks: the inbound task reads frames and hands them to
//! [`ChatService::send_message`], the outbound task drains the session's
//! mailbox onto the socket. Whichever finishes first tears the other down, so a
//! session never lingers half-open.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::chat::{Author, ChatMessage, ChatService, Mailbox, RoomKey};
use crate::metrics::ChatMetrics;

use super::InboundFrame;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent a close frame or the stream ended
    ClientClosed,
    /// Reading from the connection failed
    ReceiveError,
    /// Client sent a frame that is not a chat message
    MalformedFrame,
    /// Writing to the connection failed
    SendFailed,
    /// Mailbox stopped yielding messages
    MailboxClosed,
    /// One of the session tasks panicked or was cancelled
    TaskAborted,
}

/// Everything the inbound task needs to turn a frame into a message.
struct Inbound {
    service: Arc<ChatService>,
    room: RoomKey,
    author: Author,
}

impl Inbound {
    async fn handle_frame(&self, frame: Message) -> ControlFlow<SessionEnd> {
        match frame {
            Message::Text(text) => self.handle_payload(text.as_str().as_bytes()).await,
            Message::Binary(bytes) => self.handle_payload(&bytes).await,
            Message::Ping(_) | Message::Pong(_) => ControlFlow::Continue(()),
            Message::Close(_) => ControlFlow::Break(SessionEnd::ClientClosed),
        }
    }

    async fn handle_payload(&self, payload: &[u8]) -> ControlFlow<SessionEnd> {
        let frame: InboundFrame = match serde_json::from_slice(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed chat frame, closing session");
                return ControlFlow::Break(SessionEnd::MalformedFrame);
            }
        };

        let draft = ChatMessage::draft(&self.room, &self.author, frame.text, frame.file_url);
        if let Err(e) = self.service.send_message(draft).await {
            // The sender may retry on the same connection.
            tracing::warn!(error = %e, "Failed to send chat message");
        }
        ControlFlow::Continue(())
    }
}

pub struct ChatSession {
    service: Arc<ChatService>,
    room: RoomKey,
    author: Author,
    mailbox_capacity: usize,
}

impl ChatSession {
    pub fn new(
        service: Arc<ChatService>,
        room: RoomKey,
        author: Author,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            service,
            room,
            author,
            mailbox_capacity,
        }
    }

    /// Drive the session over any frame sink/stream pair until either side ends.
    #[tracing::instrument(
        name = "chat.session",
        skip_all,
        fields(room_id = %self.room.room_id(), user_id = %self.author.id)
    )]
    pub async fn run<S, R, E>(self, sink: S, stream: R) -> SessionEnd
    where
        S: Sink<Message> + Send + Unpin + 'static,
        S::Error: std::fmt::Display + Send,
        R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let started = Instant::now();
        let room_id = self.room.room_id();
        let hub = Arc::clone(self.service.hub());

        let (mailbox, rx) = Mailbox::channel(self.mailbox_capacity);
        hub.register(&room_id, &mailbox);
        ChatMetrics::connection_opened();
        tracing::info!(subscriber_id = %mailbox.id(), "Chat session opened");

        let mut send_task = tokio::spawn(write_outbound(rx, sink).in_current_span());

        let inbound = Inbound {
            service: self.service,
            room: self.room,
            author: self.author,
        };
        let mut recv_task = tokio::spawn(read_inbound(inbound, stream).in_current_span());

        let end = tokio::select! {
            res = &mut send_task => res.unwrap_or(SessionEnd::TaskAborted),
            res = &mut recv_task => res.unwrap_or(SessionEnd::TaskAborted),
        };

        hub.unregister(&room_id, mailbox.id());
        send_task.abort();
        recv_task.abort();
        drop(mailbox);

        let duration = started.elapsed();
        ChatMetrics::connection_closed(duration);
        tracing::info!(
            reason = ?end,
            duration_secs = duration.as_secs_f64(),
            "Chat session closed"
        );

        end
    }
}

/// Write mailbox messages to the connection in arrival order.
async fn write_outbound<S>(mut rx: mpsc::Receiver<Arc<ChatMessage>>, mut sink: S) -> SessionEnd
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = rx.recv().await {
        let text = match serde_json::to_string(message.as_ref()) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, message_id = %message.id, "Failed to serialize chat message");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(error = %e, "Chat socket write failed");
            return SessionEnd::SendFailed;
        }
    }

    SessionEnd::MailboxClosed
}

async fn read_inbound<R, E>(inbound: Inbound, mut stream: R) -> SessionEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(result) = stream.next().await {
        match result {
            Ok(frame) => {
                if let ControlFlow::Break(end) = inbound.handle_frame(frame).await {
                    return end;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat socket receive error");
                return SessionEnd::ReceiveError;
            }
        }
    }

    SessionEnd::ClientClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::chat::{MemoryMessageStore, RoomHub};
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use std::time::Duration;

    type Inbox = UnboundedSender<Result<Message, axum::Error>>;

    fn service() -> (Arc<ChatService>, Arc<RoomHub>, Arc<MemoryMessageStore>) {
        let hub = Arc::new(RoomHub::new());
        let store = Arc::new(MemoryMessageStore::new());
        let service = Arc::new(ChatService::new(store.clone(), hub.clone(), 50));
        (service, hub, store)
    }

    fn author(id: &str, role: Role) -> Author {
        Author {
            id: id.to_string(),
            name: String::new(),
            role,
        }
    }

    fn open(
        service: &Arc<ChatService>,
        author: Author,
    ) -> (Inbox, UnboundedReceiver<Message>, tokio::task::JoinHandle<SessionEnd>) {
        let room = RoomKey::new("mod1", "stud1").unwrap();
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        let session = ChatSession::new(service.clone(), room, author, 8);
        let handle = tokio::spawn(session.run(out_tx, in_rx));
        (in_tx, out_rx, handle)
    }

    fn text(json: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(json.to_string().into()))
    }

    async fn wait_for_subscribers(hub: &RoomHub, room_id: &str, count: usize) {
        for _ in 0..200 {
            if hub.subscriber_count(room_id) == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("room {} never reached {} subscribers", room_id, count);
    }

    async fn next_message(rx: &mut UnboundedReceiver<Message>) -> ChatMessage {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound stream ended");
        match frame {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_message_reaches_all_room_members() {
        let (service, hub, store) = service();
        let (a_in, mut a_out, _a) = open(&service, author("stud1", Role::Student));
        let (_b_in, mut b_out, _b) = open(&service, author("teacher1", Role::Teacher));
        wait_for_subscribers(&hub, "mod1_stud1", 2).await;

        a_in.unbounded_send(text(r#"{"text":"hi"}"#)).unwrap();

        for out in [&mut a_out, &mut b_out] {
            let msg = next_message(out).await;
            assert_eq!(msg.message_text, "hi");
            assert_eq!(msg.sender_id, "stud1");
            assert_eq!(msg.module_id, "mod1");
            assert_eq!(msg.student_id, "stud1");
            assert!(!msg.id.is_empty());
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_unregisters_only_that_session() {
        let (service, hub, _store) = service();
        let (a_in, mut a_out, _a) = open(&service, author("stud1", Role::Student));
        let (b_in, mut b_out, b) = open(&service, author("teacher1", Role::Teacher));
        wait_for_subscribers(&hub, "mod1_stud1", 2).await;

        a_in.unbounded_send(text(r#"{"text":"hi"}"#)).unwrap();
        assert_eq!(next_message(&mut a_out).await.message_text, "hi");
        assert_eq!(next_message(&mut b_out).await.message_text, "hi");

        drop(b_in);
        assert_eq!(b.await.unwrap(), SessionEnd::ClientClosed);
        assert_eq!(hub.subscriber_count("mod1_stud1"), 1);

        a_in.unbounded_send(text(r#"{"text":"bye"}"#)).unwrap();
        assert_eq!(next_message(&mut a_out).await.message_text, "bye");
        // B's outbound half is gone with its session.
        assert!(b_out.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_frame_ends_session_and_removes_room() {
        let (service, hub, _store) = service();
        let (a_in, _a_out, a) = open(&service, author("stud1", Role::Student));
        wait_for_subscribers(&hub, "mod1_stud1", 1).await;

        a_in.unbounded_send(Ok(Message::Close(None))).unwrap();
        assert_eq!(a.await.unwrap(), SessionEnd::ClientClosed);
        assert!(!hub.contains_room("mod1_stud1"));
    }

    #[tokio::test]
    async fn test_malformed_frame_terminates_only_owner() {
        let (service, hub, store) = service();
        let (a_in, _a_out, a) = open(&service, author("stud1", Role::Student));
        let (b_in, mut b_out, _b) = open(&service, author("teacher1", Role::Teacher));
        wait_for_subscribers(&hub, "mod1_stud1", 2).await;

        a_in.unbounded_send(text("definitely not json")).unwrap();
        assert_eq!(a.await.unwrap(), SessionEnd::MalformedFrame);
        assert_eq!(hub.subscriber_count("mod1_stud1"), 1);
        assert!(store.is_empty().await);

        b_in.unbounded_send(text(r#"{"text":"still here"}"#)).unwrap();
        assert_eq!(next_message(&mut b_out).await.message_text, "still here");
    }

    #[tokio::test]
    async fn test_outbound_failure_tears_down_inbound() {
        let (service, hub, _store) = service();
        let (a_in, a_out, a) = open(&service, author("stud1", Role::Student));
        wait_for_subscribers(&hub, "mod1_stud1", 1).await;

        // Closing the client's receiving side makes the next write fail.
        drop(a_out);
        a_in.unbounded_send(text(r#"{"text":"echo"}"#)).unwrap();

        let end = tokio::time::timeout(Duration::from_secs(2), a).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::SendFailed);
        assert!(!hub.contains_room("mod1_stud1"));
    }

    #[tokio::test]
    async fn test_binary_json_frame_accepted() {
        let (service, hub, _store) = service();
        let (a_in, mut a_out, _a) = open(&service, author("stud1", Role::Student));
        wait_for_subscribers(&hub, "mod1_stud1", 1).await;

        let payload = br#"{"text":"bin","file_url":"https://cdn/f.pdf"}"#.to_vec();
        a_in.unbounded_send(Ok(Message::Binary(payload.into()))).unwrap();

        let msg = next_message(&mut a_out).await;
        assert_eq!(msg.message_text, "bin");
        assert_eq!(msg.file_url, "https://cdn/f.pdf");
    }
}
