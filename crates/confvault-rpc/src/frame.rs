//! Wire types and length-prefixed frame codec.
//!
//! # Design
//! - A frame is `u32` big-endian length followed by a MessagePack body.
//! - Bodies larger than [`MAX_FRAME_BYTES`] are refused in both directions.
//! - Documents travel as JSON bytes inside the frame; an empty buffer means
//!   "no document".

use confvault_core::{
    ConfigRequest, ConfigResponse, Document, ErrorKind, VersionError, VersionSelector,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RpcError;

/// Largest accepted frame body.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Operation requested by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcMethod {
    /// Create a new active snapshot.
    SetConfig,
    /// Read a snapshot.
    GetConfig,
    /// Change a snapshot's activation.
    UpdConfig,
    /// Delete an inactive snapshot.
    DelConfig,
}

impl RpcMethod {
    /// Operation label used in spans and metrics.
    #[must_use]
    pub const fn operation(self) -> &'static str {
        match self {
            Self::SetConfig => "create",
            Self::GetConfig => "get",
            Self::UpdConfig => "update",
            Self::DelConfig => "delete",
        }
    }
}

/// Request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Operation to run.
    pub method: RpcMethod,
    /// Target service.
    pub service: String,
    /// Wire version, `0` for the active snapshot.
    pub version: i32,
    /// Desired activation state for `UpdConfig`.
    pub used: bool,
    /// JSON-encoded document; empty or `null` when absent.
    pub data: Vec<u8>,
}

impl RpcRequest {
    /// Decode into the canonical request.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when the version is negative or `data` is not a
    /// JSON object.
    pub fn to_config_request(&self) -> Result<ConfigRequest, VersionError> {
        let version = VersionSelector::from_wire(i64::from(self.version))?;
        let data = decode_document(&self.data).map_err(|_| VersionError::BadRequest {
            field: "data",
            reason: "must be a JSON object",
        })?;
        Ok(ConfigRequest::builder(self.service.clone())
            .version(version)
            .used(self.used)
            .maybe_data(data)
            .build())
    }
}

/// Snapshot carried by a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Service name.
    pub service: String,
    /// Version the operation resolved to.
    pub version: i32,
    /// Activation state after the operation.
    pub used: bool,
    /// JSON-encoded document; empty for update and delete.
    pub data: Vec<u8>,
}

impl RpcConfig {
    /// Encode a manager response.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialised.
    pub fn from_response(response: &ConfigResponse) -> Result<Self, serde_json::Error> {
        let data = match &response.data {
            Some(document) => serde_json::to_vec(document)?,
            None => Vec::new(),
        };
        Ok(Self {
            service: response.service.clone(),
            version: response.version.get(),
            used: response.active,
            data,
        })
    }

    /// Decode the carried document, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object.
    pub fn document(&self) -> Result<Option<Document>, serde_json::Error> {
        decode_document(&self.data)
    }
}

fn decode_document(bytes: &[u8]) -> Result<Option<Document>, serde_json::Error> {
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(bytes)
}

/// Error status carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    /// Error classification.
    pub code: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

/// Response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcResponse {
    /// The operation succeeded.
    Ok(RpcConfig),
    /// The operation failed.
    Err(RpcStatus),
}

/// Read one frame. Returns `None` on a clean end of stream before a new frame.
///
/// # Errors
///
/// Returns an error on IO failure, a stream that closes inside the length
/// prefix, an oversized frame, or an undecodable body.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut prefix = [0_u8; 4];
    let mut received = 0;
    while received < prefix.len() {
        match reader.read(&mut prefix[received..]).await? {
            0 if received == 0 => return Ok(None),
            0 => return Err(RpcError::TruncatedFrame { received }),
            read => received += read,
        }
    }
    let len = usize::try_from(u32::from_be_bytes(prefix)).unwrap_or(usize::MAX);
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge { len });
    }
    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(rmp_serde::from_slice(&body)?))
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns an error on encode failure, an oversized body, or IO failure.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = rmp_serde::to_vec_named(value)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge { len: body.len() });
    }
    let len = u32::try_from(body.len()).map_err(|_| RpcError::FrameTooLarge { len: body.len() })?;
    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confvault_core::Version;
    use serde_json::json;

    fn request(data: &[u8]) -> RpcRequest {
        RpcRequest {
            method: RpcMethod::SetConfig,
            service: "svc".into(),
            version: 0,
            used: false,
            data: data.to_vec(),
        }
    }

    #[tokio::test]
    async fn frames_cross_a_stream_in_order() -> anyhow::Result<()> {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let first = request(br#"{"k":"v"}"#);
        let second = RpcRequest {
            method: RpcMethod::DelConfig,
            version: 4,
            ..request(b"")
        };
        write_frame(&mut client, &first).await?;
        write_frame(&mut client, &second).await?;
        drop(client);

        assert_eq!(read_frame::<_, RpcRequest>(&mut server).await?, Some(first));
        assert_eq!(read_frame::<_, RpcRequest>(&mut server).await?, Some(second));
        assert_eq!(read_frame::<_, RpcRequest>(&mut server).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_refused() -> anyhow::Result<()> {
        let (mut client, mut server) = tokio::io::duplex(64);
        let declared = u32::try_from(MAX_FRAME_BYTES + 1)?;
        client.write_u32(declared).await?;
        let result = read_frame::<_, RpcRequest>(&mut server).await;
        assert!(matches!(result, Err(RpcError::FrameTooLarge { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn partial_length_prefix_is_an_error() -> anyhow::Result<()> {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0]).await?;
        drop(client);
        let result = read_frame::<_, RpcRequest>(&mut server).await;
        assert!(matches!(
            result,
            Err(RpcError::TruncatedFrame { received: 2 })
        ));
        Ok(())
    }

    #[test]
    fn request_decoding_validates_fields() -> anyhow::Result<()> {
        let decoded = request(br#"{"k":"v"}"#).to_config_request()?;
        assert_eq!(decoded.version(), VersionSelector::Active);
        assert_eq!(
            decoded.data().and_then(|doc| doc.get("k")),
            Some(&json!("v"))
        );

        assert!(request(b"").to_config_request()?.data().is_none());
        assert!(request(b"null").to_config_request()?.data().is_none());
        assert!(request(b"[1,2]").to_config_request().is_err());

        let negative = RpcRequest {
            version: -1,
            ..request(b"")
        };
        assert!(negative.to_config_request().is_err());
        Ok(())
    }

    #[test]
    fn config_encodes_optional_document() -> anyhow::Result<()> {
        let without = RpcConfig::from_response(&ConfigResponse {
            service: "svc".into(),
            version: Version::FIRST,
            data: None,
            active: true,
        })?;
        assert!(without.data.is_empty());
        let null = RpcConfig {
            data: b"null".to_vec(),
            ..without.clone()
        };
        assert_eq!(null.document()?, None);
        assert_eq!(without.document()?, None);

        let mut document = Document::new();
        document.insert("k".into(), json!(1));
        let with = RpcConfig::from_response(&ConfigResponse {
            service: "svc".into(),
            version: Version::FIRST,
            data: Some(document.clone()),
            active: false,
        })?;
        assert_eq!(with.document()?, Some(document));
        assert!(!with.used);
        Ok(())
    }
}
