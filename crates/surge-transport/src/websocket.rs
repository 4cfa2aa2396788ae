//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] to the [`FrameSource`] / [`FrameSink`]
//! pair. Fragmented messages are reassembled by the WebSocket layer, so the
//! read half only ever yields complete frames.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use surge_protocol::{Frame, FrameType, ProtocolError};
use tracing::debug;

use crate::traits::{FrameSink, FrameSource, TransportError};

/// Split an upgraded socket into its read and write halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketSource, WebSocketSink) {
    let (sink, stream) = socket.split();
    (WebSocketSource { stream }, WebSocketSink { sink })
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

/// Map an incoming WebSocket message to a frame.
///
/// # Errors
///
/// Binary messages are not part of the gateway protocol.
pub fn frame_from_message(message: Message) -> Result<Frame, ProtocolError> {
    match message {
        Message::Text(text) => Ok(Frame::text(text)),
        Message::Ping(data) => Ok(Frame::new(FrameType::Ping, data)),
        Message::Pong(data) => Ok(Frame::new(FrameType::Pong, data)),
        Message::Close(_) => Ok(Frame::close()),
        Message::Binary(data) => Err(ProtocolError::UnsupportedFrame(format!(
            "{}-byte binary frame",
            data.len()
        ))),
    }
}

/// Map an outgoing frame to a WebSocket message.
///
/// # Errors
///
/// Text payloads must be valid UTF-8; continuation frames cannot be written
/// directly.
pub fn message_from_frame(frame: Frame) -> Result<Message, TransportError> {
    match frame.frame_type() {
        FrameType::Text => {
            let text = String::from_utf8(frame.into_payload().to_vec())
                .map_err(|_| TransportError::SendFailed("text payload is not valid UTF-8".into()))?;
            Ok(Message::Text(text))
        }
        FrameType::Ping => Ok(Message::Ping(frame.into_payload().to_vec())),
        FrameType::Pong => Ok(Message::Pong(frame.into_payload().to_vec())),
        FrameType::Close => Ok(Message::Close(None)),
        FrameType::Continuation => Err(TransportError::Protocol(
            ProtocolError::UnsupportedFrame("outbound continuation frame".into()),
        )),
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.stream.next().await {
            Some(Ok(message)) => Ok(Some(frame_from_message(message)?)),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = message_from_frame(frame)?;
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_from_message() {
        let frame = frame_from_message(Message::Text("hello".into())).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Text);
        assert_eq!(frame.payload().as_ref(), b"hello");

        let frame = frame_from_message(Message::Ping(b"p".to_vec())).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Ping);

        let frame = frame_from_message(Message::Close(None)).unwrap();
        assert_eq!(frame.frame_type(), FrameType::Close);
    }

    #[test]
    fn test_binary_is_unsupported() {
        assert!(matches!(
            frame_from_message(Message::Binary(vec![1, 2, 3])),
            Err(ProtocolError::UnsupportedFrame(_))
        ));
    }

    #[test]
    fn test_message_from_frame() {
        match message_from_frame(Frame::pong()).unwrap() {
            Message::Pong(data) => assert_eq!(data, b"pong"),
            other => panic!("Expected pong, got {:?}", other),
        }

        match message_from_frame(Frame::text(r#"{"id":"1"}"#)).unwrap() {
            Message::Text(text) => assert_eq!(text, r#"{"id":"1"}"#),
            other => panic!("Expected text, got {:?}", other),
        }

        assert!(message_from_frame(Frame::text(vec![0xff, 0xfe])).is_err());
        assert!(message_from_frame(Frame::continuation("x")).is_err());
    }
}
