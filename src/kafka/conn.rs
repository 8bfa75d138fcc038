//! Broker connections
//!
//! Length-prefixed framing over TCP, ApiVersions negotiation, and a typed
//! request/response exchange built on the `kafka-protocol` message types.
//! One connection serves one broker; the service layer owns routing.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::{
    AlterConfigsRequest, AlterConfigsResponse, AlterPartitionReassignmentsRequest,
    AlterPartitionReassignmentsResponse, ApiKey, ApiVersionsRequest, ApiVersionsResponse,
    CreateAclsRequest, CreateAclsResponse, CreatePartitionsRequest, CreatePartitionsResponse,
    CreateTopicsRequest, CreateTopicsResponse, DeleteAclsRequest, DeleteAclsResponse,
    DescribeAclsRequest, DescribeAclsResponse, DescribeConfigsRequest, DescribeConfigsResponse,
    IncrementalAlterConfigsRequest, IncrementalAlterConfigsResponse, MetadataRequest,
    MetadataResponse, RequestHeader, ResponseHeader,
};
use kafka_protocol::protocol::{Decodable, Encodable, StrBytes};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{KdeclError, Result};

/// An admin request kdecl can issue, with the version window it understands.
pub(crate) trait AdminRequest: Encodable {
    const API_KEY: ApiKey;
    const MIN_VERSION: i16;
    const MAX_VERSION: i16;
    type Response: Decodable;
}

macro_rules! admin_request {
    ($request:ty, $response:ty, $key:expr, $min:expr, $max:expr) => {
        impl AdminRequest for $request {
            const API_KEY: ApiKey = $key;
            const MIN_VERSION: i16 = $min;
            const MAX_VERSION: i16 = $max;
            type Response = $response;
        }
    };
}

admin_request!(MetadataRequest, MetadataResponse, ApiKey::MetadataKey, 1, 9);
admin_request!(
    DescribeConfigsRequest,
    DescribeConfigsResponse,
    ApiKey::DescribeConfigsKey,
    1,
    4
);
admin_request!(
    AlterConfigsRequest,
    AlterConfigsResponse,
    ApiKey::AlterConfigsKey,
    0,
    2
);
admin_request!(
    IncrementalAlterConfigsRequest,
    IncrementalAlterConfigsResponse,
    ApiKey::IncrementalAlterConfigsKey,
    0,
    1
);
admin_request!(
    CreateTopicsRequest,
    CreateTopicsResponse,
    ApiKey::CreateTopicsKey,
    1,
    7
);
admin_request!(
    CreatePartitionsRequest,
    CreatePartitionsResponse,
    ApiKey::CreatePartitionsKey,
    0,
    3
);
admin_request!(
    AlterPartitionReassignmentsRequest,
    AlterPartitionReassignmentsResponse,
    ApiKey::AlterPartitionReassignmentsKey,
    0,
    0
);
admin_request!(
    kafka_protocol::messages::ListPartitionReassignmentsRequest,
    kafka_protocol::messages::ListPartitionReassignmentsResponse,
    ApiKey::ListPartitionReassignmentsKey,
    0,
    0
);
admin_request!(
    DescribeAclsRequest,
    DescribeAclsResponse,
    ApiKey::DescribeAclsKey,
    1,
    2
);
admin_request!(CreateAclsRequest, CreateAclsResponse, ApiKey::CreateAclsKey, 1, 2);
admin_request!(DeleteAclsRequest, DeleteAclsResponse, ApiKey::DeleteAclsKey, 1, 2);

/// Body version at which each API switched to flexible (compact) encoding.
/// Requests at or above it use header v2, responses header v1.
fn flexible_from(api_key: ApiKey) -> i16 {
    match api_key {
        ApiKey::MetadataKey => 9,
        ApiKey::DescribeConfigsKey => 4,
        ApiKey::AlterConfigsKey => 2,
        ApiKey::IncrementalAlterConfigsKey => 1,
        ApiKey::CreateTopicsKey => 5,
        ApiKey::CreatePartitionsKey => 2,
        ApiKey::AlterPartitionReassignmentsKey => 0,
        ApiKey::ListPartitionReassignmentsKey => 0,
        ApiKey::DescribeAclsKey => 2,
        ApiKey::CreateAclsKey => 2,
        ApiKey::DeleteAclsKey => 2,
        ApiKey::ApiVersionsKey => 3,
        _ => i16::MAX,
    }
}

fn request_header_version(api_key: ApiKey, api_version: i16) -> i16 {
    if api_version >= flexible_from(api_key) {
        2
    } else {
        1
    }
}

fn response_header_version(api_key: ApiKey, api_version: i16) -> i16 {
    // ApiVersions responses always use the non-flexible header so that the
    // version bootstrap itself never depends on negotiation.
    if matches!(api_key, ApiKey::ApiVersionsKey) {
        return 0;
    }
    if api_version >= flexible_from(api_key) {
        1
    } else {
        0
    }
}

/// A connection to a single broker.
pub(crate) struct BrokerConnection {
    stream: TcpStream,
    addr: String,
    client_id: StrBytes,
    correlation_id: i32,
    timeout: Duration,
    /// Version ranges advertised by the broker, keyed by api key.
    api_versions: HashMap<i16, (i16, i16)>,
}

impl BrokerConnection {
    /// Connect and perform the ApiVersions handshake.
    pub(crate) async fn connect(addr: &str, client_id: &str, timeout: Duration) -> Result<Self> {
        debug!(addr, "connecting to broker");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| KdeclError::protocol(format!("connection to {addr} timed out")))?
            .map_err(|e| KdeclError::protocol(format!("failed to connect to {addr}: {e}")))?;

        let mut conn = BrokerConnection {
            stream,
            addr: addr.to_string(),
            client_id: StrBytes::from_string(client_id.to_string()),
            correlation_id: 0,
            timeout,
            api_versions: HashMap::new(),
        };
        conn.negotiate_api_versions().await?;
        Ok(conn)
    }

    /// Whether the broker advertises the given API at all.
    pub(crate) fn supports(&self, api_key: ApiKey) -> bool {
        self.api_versions.contains_key(&(api_key as i16))
    }

    /// Send a request at the highest mutually supported version.
    pub(crate) async fn send<R: AdminRequest>(&mut self, request: &R) -> Result<R::Response> {
        let version = self.negotiated_version::<R>()?;
        let correlation_id = self.next_correlation_id();

        let header = RequestHeader::default()
            .with_request_api_key(R::API_KEY as i16)
            .with_request_api_version(version)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, request_header_version(R::API_KEY, version))
            .map_err(|e| KdeclError::protocol(format!("failed to encode request header: {e}")))?;
        request
            .encode(&mut buf, version)
            .map_err(|e| KdeclError::protocol(format!("failed to encode request: {e}")))?;

        trace!(api_key = ?R::API_KEY, version, correlation_id, "sending request");
        self.write_frame(&buf).await?;
        let mut frame = self.read_frame().await?;

        let header_version = response_header_version(R::API_KEY, version);
        let response_header = ResponseHeader::decode(&mut frame, header_version)
            .map_err(|e| KdeclError::protocol(format!("failed to decode response header: {e}")))?;
        if response_header.correlation_id != correlation_id {
            return Err(KdeclError::protocol(format!(
                "correlation id mismatch: expected {correlation_id}, got {}",
                response_header.correlation_id
            )));
        }

        R::Response::decode(&mut frame, version)
            .map_err(|e| KdeclError::protocol(format!("failed to decode response: {e}")))
    }

    fn negotiated_version<R: AdminRequest>(&self) -> Result<i16> {
        let (broker_min, broker_max) = self
            .api_versions
            .get(&(R::API_KEY as i16))
            .copied()
            .ok_or_else(|| {
                KdeclError::protocol(format!(
                    "broker {} does not support {:?}",
                    self.addr,
                    R::API_KEY
                ))
            })?;
        let version = R::MAX_VERSION.min(broker_max);
        if version < R::MIN_VERSION || version < broker_min {
            return Err(KdeclError::protocol(format!(
                "no mutually supported version for {:?} (broker {}..{})",
                R::API_KEY,
                broker_min,
                broker_max
            )));
        }
        Ok(version)
    }

    /// Version bootstrap: ApiVersions v0 is understood by every broker and
    /// its response never uses the flexible header.
    async fn negotiate_api_versions(&mut self) -> Result<()> {
        let correlation_id = self.next_correlation_id();
        let header = RequestHeader::default()
            .with_request_api_key(ApiKey::ApiVersionsKey as i16)
            .with_request_api_version(0)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(self.client_id.clone()));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, 1)
            .map_err(|e| KdeclError::protocol(format!("failed to encode request header: {e}")))?;
        ApiVersionsRequest::default()
            .encode(&mut buf, 0)
            .map_err(|e| KdeclError::protocol(format!("failed to encode request: {e}")))?;

        self.write_frame(&buf).await?;
        let mut frame = self.read_frame().await?;
        let _ = ResponseHeader::decode(&mut frame, 0)
            .map_err(|e| KdeclError::protocol(format!("failed to decode response header: {e}")))?;
        let response = ApiVersionsResponse::decode(&mut frame, 0)
            .map_err(|e| KdeclError::protocol(format!("failed to decode response: {e}")))?;
        if response.error_code != 0 {
            return Err(KdeclError::protocol(format!(
                "ApiVersions request failed with error code {}",
                response.error_code
            )));
        }

        self.api_versions = response
            .api_keys
            .iter()
            .map(|v| (v.api_key, (v.min_version, v.max_version)))
            .collect();
        debug!(
            addr = %self.addr,
            apis = self.api_versions.len(),
            "negotiated api versions"
        );
        Ok(())
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut frame = BytesMut::with_capacity(payload.len() + 4);
        frame.extend_from_slice(&(payload.len() as i32).to_be_bytes());
        frame.extend_from_slice(payload);
        tokio::time::timeout(self.timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| KdeclError::protocol(format!("request to {} timed out", self.addr)))?
            .map_err(|e| KdeclError::protocol(format!("failed to write to {}: {e}", self.addr)))?;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        let mut size_buf = [0u8; 4];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut size_buf))
            .await
            .map_err(|_| KdeclError::protocol(format!("response from {} timed out", self.addr)))?
            .map_err(|e| KdeclError::protocol(format!("failed to read from {}: {e}", self.addr)))?;

        let size = i32::from_be_bytes(size_buf);
        if size < 0 {
            return Err(KdeclError::protocol(format!(
                "invalid response frame size {size} from {}",
                self.addr
            )));
        }

        let mut payload = vec![0u8; size as usize];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut payload))
            .await
            .map_err(|_| KdeclError::protocol(format!("response from {} timed out", self.addr)))?
            .map_err(|e| KdeclError::protocol(format!("failed to read from {}: {e}", self.addr)))?;
        Ok(Bytes::from(payload))
    }

    fn next_correlation_id(&mut self) -> i32 {
        let id = self.correlation_id;
        self.correlation_id = self.correlation_id.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_versions_follow_flexible_threshold() {
        assert_eq!(request_header_version(ApiKey::MetadataKey, 8), 1);
        assert_eq!(request_header_version(ApiKey::MetadataKey, 9), 2);
        assert_eq!(request_header_version(ApiKey::AlterPartitionReassignmentsKey, 0), 2);
        assert_eq!(response_header_version(ApiKey::MetadataKey, 8), 0);
        assert_eq!(response_header_version(ApiKey::MetadataKey, 9), 1);
        assert_eq!(response_header_version(ApiKey::ApiVersionsKey, 3), 0);
    }
}
