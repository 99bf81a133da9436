use ahash::HashMap;
use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        ClientRequestBuilder,
        http::header::SEC_WEBSOCKET_PROTOCOL,
    },
};

use crate::{
    peer::connector::connector::{
        Connection,
        Connector,
    },
    serializer::serializer::SerializerType,
    transport::web_socket_transport::WebSocketTransport,
};

/// A [`Connector`] for routers listening for WebSocket connections.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    agent: String,
    serializers: Vec<SerializerType>,
    headers: HashMap<String, String>,
}

impl WebSocketConnector {
    /// Creates a connector offering the given serializers, in order of preference.
    pub fn new<I>(agent: String, serializers: I, headers: HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = SerializerType>,
    {
        Self {
            agent,
            serializers: serializers.into_iter().collect(),
            headers,
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Connection> {
        let mut request = ClientRequestBuilder::new(url.try_into()?);
        if !self.agent.is_empty() {
            request = request.with_header("User-Agent", &self.agent);
        }
        for protocol in &self.serializers {
            request = request.with_sub_protocol(protocol.uri().to_string());
        }
        for (key, value) in &self.headers {
            request = request.with_header(key, value);
        }

        let (stream, response) = connect_async(request).await?;
        let serializer = match response.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            Some(protocol) => {
                let protocol = protocol.to_str()?;
                SerializerType::try_from(protocol).map_err(Error::msg)?
            }
            None => return Err(Error::msg("handshake did not produce a sub-protocol")),
        };

        Ok(Connection {
            transport: Box::new(WebSocketTransport::new(stream, serializer)),
            serializer,
        })
    }
}
