use pane_bridge_runtime::{ReactiveModel, Transport, ViewId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;

/// Largest client frame accepted. Client frames carry small event payloads.
pub const CLIENT_TO_HOST_CAP: usize = 65_536;
/// Largest host frame written. Model frames carry a whole `ReactiveModel`,
/// and a late joiner's model holds the full snapshot.
pub const HOST_TO_CLIENT_CAP: usize = 1_048_576;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "t")]
pub enum ClientEnvelope {
    #[serde(rename = "attach")]
    Attach {
        view: ViewId,
        #[serde(default)]
        parent: Option<ViewId>,
        #[serde(default)]
        transport: Transport,
    },

    #[serde(rename = "detach")]
    Detach { view: ViewId },

    #[serde(rename = "msg")]
    Msg {
        view: ViewId,
        #[serde(default)]
        msg: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum HostEnvelope {
    #[serde(rename = "ready")]
    Ready { capabilities: Value },

    #[serde(rename = "model")]
    Model { view: ViewId, model: ReactiveModel },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

pub fn ready_envelope(interactive: bool) -> HostEnvelope {
    HostEnvelope::Ready {
        capabilities: serde_json::json!({
            "interactive": interactive,
            "transport": "stdio-packet-4"
        }),
    }
}

pub fn error_envelope(code: impl Into<String>, message: impl ToString) -> HostEnvelope {
    HostEnvelope::Error {
        code: code.into(),
        message: message.to_string(),
    }
}

pub fn writer_loop(rx: Receiver<HostEnvelope>) -> io::Result<()> {
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    for envelope in rx {
        let payload = encode_host_envelope(&envelope)?;
        write_frame(&mut writer, &payload, HOST_TO_CLIENT_CAP)?;
        writer.flush()?;
    }

    Ok(())
}

/// Reads frames from stdin until EOF. Malformed envelopes are handed to the
/// callback so the host can answer them; framing errors end the loop.
pub fn reader_loop<F>(on_envelope: F) -> io::Result<()>
where
    F: FnMut(Result<ClientEnvelope, serde_json::Error>),
{
    let stdin = io::stdin();
    read_envelopes(&mut stdin.lock(), on_envelope)
}

fn read_envelopes<F>(reader: &mut impl Read, mut on_envelope: F) -> io::Result<()>
where
    F: FnMut(Result<ClientEnvelope, serde_json::Error>),
{
    loop {
        match read_frame(reader, CLIENT_TO_HOST_CAP) {
            Ok(payload) => on_envelope(decode_client_envelope(&payload)),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

fn encode_host_envelope(envelope: &HostEnvelope) -> io::Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(json_error)
}

fn decode_client_envelope(payload: &[u8]) -> Result<ClientEnvelope, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Reads one length-prefixed frame, rejecting any length above `max_payload`
/// before allocating for it.
fn read_frame(reader: &mut impl Read, max_payload: usize) -> io::Result<Vec<u8>> {
    let mut len_buf = [0_u8; 4];
    reader.read_exact(&mut len_buf)?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} > {max_payload}"),
        ));
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Writes one frame. An oversized payload is refused without writing any
/// bytes, so the stream stays aligned for the next frame.
fn write_frame(writer: &mut impl Write, payload: &[u8], max_payload: usize) -> io::Result<()> {
    if payload.len() > max_payload {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} > {}", payload.len(), max_payload),
        ));
    }

    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}

fn json_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
