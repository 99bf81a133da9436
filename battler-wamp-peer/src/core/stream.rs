use std::{
    pin::Pin,
    task,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Sink,
    SinkExt,
    Stream,
    StreamExt,
};

use crate::{
    message::message::Message,
    serializer::serializer::Serializer,
    transport::transport::{
        Transport,
        TransportData,
    },
};

/// A message read from or written to a [`MessageStream`].
#[derive(Debug)]
pub enum StreamMessage {
    Ping(Vec<u8>),
    Message(Message),
    /// A frame that could not be decoded into a message.
    ///
    /// Never written.
    Invalid(Error),
}

/// A stream of WAMP messages over a [`Transport`], using a negotiated [`Serializer`].
#[derive(Debug)]
pub struct MessageStream {
    transport: Box<dyn Transport>,
    serializer: Box<dyn Serializer>,
}

impl MessageStream {
    pub fn new(transport: Box<dyn Transport>, serializer: Box<dyn Serializer>) -> Self {
        Self {
            transport,
            serializer,
        }
    }
}

impl Stream for MessageStream {
    type Item = Result<StreamMessage>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        match futures_util::ready!(self.transport.poll_next_unpin(cx)) {
            Some(Ok(TransportData::Ping(data))) => {
                task::Poll::Ready(Some(Ok(StreamMessage::Ping(data))))
            }
            Some(Ok(TransportData::Message(data))) => {
                let message = match self.serializer.deserialize(&data) {
                    Ok(message) => StreamMessage::Message(message),
                    Err(err) => StreamMessage::Invalid(err),
                };
                task::Poll::Ready(Some(Ok(message)))
            }
            Some(Err(err)) => task::Poll::Ready(Some(Err(err))),
            None => task::Poll::Ready(None),
        }
    }
}

impl Sink<StreamMessage> for MessageStream {
    type Error = Error;

    fn poll_ready(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_ready_unpin(cx)
    }

    fn start_send(
        mut self: Pin<&mut Self>,
        item: StreamMessage,
    ) -> std::result::Result<(), Self::Error> {
        let data = match item {
            StreamMessage::Ping(data) => TransportData::Ping(data),
            StreamMessage::Message(message) => {
                TransportData::Message(self.serializer.serialize(&message)?)
            }
            StreamMessage::Invalid(err) => return Err(err.context("cannot write invalid frame")),
        };
        self.transport.start_send_unpin(data)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_flush_unpin(cx)
    }

    fn poll_close(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<std::result::Result<(), Self::Error>> {
        self.transport.poll_close_unpin(cx)
    }
}

#[cfg(test)]
mod stream_test {
    use futures_util::{
        SinkExt,
        StreamExt,
    };

    use crate::{
        core::stream::{
            MessageStream,
            StreamMessage,
        },
        message::common::goodbye_and_out,
        serializer::serializer::{
            SerializerType,
            new_serializer,
        },
        transport::{
            direct_transport::DirectTransport,
            transport::TransportData,
        },
    };

    #[tokio::test]
    async fn surfaces_undecodable_frames_without_failing() {
        let (local, mut remote) = DirectTransport::pair();
        let mut stream = MessageStream::new(Box::new(local), new_serializer(SerializerType::Json));

        remote
            .send(TransportData::Message(b"not json".to_vec()))
            .await
            .unwrap();
        remote
            .send(TransportData::Message(br#"[6, {}, "wamp.close.normal"]"#.to_vec()))
            .await
            .unwrap();

        assert_matches::assert_matches!(stream.next().await, Some(Ok(StreamMessage::Invalid(_))));
        assert_matches::assert_matches!(stream.next().await, Some(Ok(StreamMessage::Message(message))) => {
            assert_eq!(message.message_name(), "GOODBYE");
        });
    }

    #[tokio::test]
    async fn writes_serialized_messages() {
        let (local, mut remote) = DirectTransport::pair();
        let mut stream = MessageStream::new(Box::new(local), new_serializer(SerializerType::Json));
        stream
            .send(StreamMessage::Message(goodbye_and_out()))
            .await
            .unwrap();
        assert_matches::assert_matches!(remote.next().await, Some(Ok(TransportData::Message(data))) => {
            assert_eq!(data, br#"[6,{},"wamp.close.goodbye_and_out"]"#);
        });
    }
}
