//! AXFR response streaming (RFC 5936).
//!
//! The zone arrives from the registry already framed with the SOA first
//! and last; this module packs the records into a sequence of response
//! messages, each kept under a soft size budget so the length-prefixed
//! TCP envelope never overflows. Records are never split across messages.

use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::Record;

use crate::errors::DnsError;

/// Soft per-message budget; leaves headroom under the 64 KiB TCP frame
/// for the TSIG record appended after packing.
pub const MAX_MESSAGE_BYTES: usize = 61 * 1024;

/// Pack the framed zone records into one or more response messages.
pub fn build_axfr_responses(
    request: &Message,
    records: Vec<Record>,
    max_message_bytes: usize,
) -> Result<Vec<Message>, DnsError> {
    let mut responses = Vec::new();
    let mut chunk: Vec<Record> = Vec::new();

    for record in records {
        chunk.push(record);
        let packed = pack_chunk(request, &chunk)?;
        if packed.len() > max_message_bytes && chunk.len() > 1 {
            // Budget exceeded: emit everything before this record and
            // start a fresh message holding it.
            if let Some(record) = chunk.pop() {
                responses.push(build_message(request, chunk));
                chunk = vec![record];
            }
        }
    }
    if !chunk.is_empty() {
        responses.push(build_message(request, chunk));
    }
    Ok(responses)
}

fn build_message(request: &Message, records: Vec<Record>) -> Message {
    let mut msg = Message::new();
    msg.set_id(request.id());
    msg.set_message_type(MessageType::Response);
    msg.set_op_code(OpCode::Query);
    msg.set_authoritative(true);
    for q in request.queries() {
        msg.add_query(q.clone());
    }
    for rr in records {
        msg.add_answer(rr);
    }
    msg
}

fn pack_chunk(request: &Message, chunk: &[Record]) -> Result<Vec<u8>, DnsError> {
    build_message(request, chunk.to_vec())
        .to_vec()
        .map_err(|e| DnsError::Internal(format!("pack AXFR message: {e}")))
}
