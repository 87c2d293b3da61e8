//! Fitting replies into the transport's size budget.
//!
//! Additional records go first; if the reply is still too large the answer
//! section is cut to the longest prefix that fits. The question and
//! authority sections are never touched.

use hickory_proto::op::{Edns, Message};
use hickory_proto::xfer::Protocol;
use tracing::debug;

use crate::metrics;

/// Size limit for UDP without EDNS (RFC 1035 section 4.2.1).
pub const MIN_UDP_SIZE: usize = 512;

/// Largest message a DNS length prefix can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Reply size budget for a query that arrived over `protocol`.
pub fn max_size(protocol: Protocol, edns: Option<&Edns>) -> usize {
    match protocol {
        Protocol::Udp => edns
            .map(|edns| usize::from(edns.max_payload()).max(MIN_UDP_SIZE))
            .unwrap_or(MIN_UDP_SIZE),
        _ => MAX_MESSAGE_SIZE,
    }
}

/// Serialized size of `message`. Messages that cannot be encoded count as
/// infinitely large.
pub fn encoded_len(message: &Message) -> usize {
    message.to_vec().map(|bytes| bytes.len()).unwrap_or(usize::MAX)
}

/// Trim `message` to at most `max_size` bytes.
///
/// The TC bit is set whenever records had to go; a TC bit that was already
/// set (e.g. by an upstream) is preserved. Running this twice gives the same
/// result as running it once.
pub fn truncate(mut message: Message, max_size: usize) -> Message {
    let oversized = encoded_len(&message) > max_size;
    let already_truncated = message.truncated();
    message.set_truncated(already_truncated || oversized);

    if !oversized {
        return message;
    }

    let dropped = message.take_additionals().len();
    if encoded_len(&message) <= max_size {
        debug!(dropped_additionals = dropped, max_size, "truncated reply");
        metrics::record_truncated();
        return message;
    }

    let answers = message.take_answers();
    let fits = |message: &mut Message, count: usize| {
        message.take_answers();
        message.add_answers(answers[..count].iter().cloned());
        encoded_len(message) <= max_size
    };

    // Largest count that fits; zero answers is accepted even if still too big.
    let (mut low, mut high) = (0, answers.len());
    while low < high {
        let mid = low + (high - low + 1) / 2;
        if fits(&mut message, mid) {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    message.take_answers();
    message.add_answers(answers[..low].iter().cloned());

    debug!(
        dropped_additionals = dropped,
        kept_answers = low,
        dropped_answers = answers.len() - low,
        max_size,
        "truncated reply"
    );
    metrics::record_truncated();
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;

    fn a_record(owner: &str, i: u32) -> Record {
        Record::from_rdata(
            Name::from_ascii(owner).unwrap(),
            60,
            RData::A(A(Ipv4Addr::from(0x0a00_0000 + i))),
        )
    }

    fn message(answers: u32, additionals: u32) -> Message {
        let mut message = Message::new();
        message.set_id(7);
        message.set_message_type(MessageType::Response);
        message.add_query(Query::query(
            Name::from_ascii("web.swan.").unwrap(),
            RecordType::SRV,
        ));
        for i in 0..answers {
            message.add_answer(a_record("web.swan.", i));
        }
        // Distinct owners defeat name compression so glue is expensive.
        for i in 0..additionals {
            message.add_additional(a_record(&format!("glue-host-number-{i}.swan."), i));
        }
        message
    }

    #[test]
    fn test_max_size_by_transport() {
        assert_eq!(max_size(Protocol::Udp, None), 512);
        assert_eq!(max_size(Protocol::Tcp, None), 65535);

        let mut edns = Edns::new();
        edns.set_max_payload(4096);
        assert_eq!(max_size(Protocol::Udp, Some(&edns)), 4096);

        edns.set_max_payload(100);
        assert_eq!(max_size(Protocol::Udp, Some(&edns)), 512);
    }

    #[test]
    fn test_fitting_message_unchanged() {
        let original = message(3, 2);
        let result = truncate(original.clone(), 512);

        assert!(!result.truncated());
        assert_eq!(result.answers(), original.answers());
        assert_eq!(result.additionals(), original.additionals());
    }

    #[test]
    fn test_dropping_additionals_can_suffice() {
        let original = message(10, 20);
        assert!(encoded_len(&original) > 512);

        let mut without_glue = original.clone();
        without_glue.take_additionals();
        assert!(encoded_len(&without_glue) <= 512);

        let result = truncate(original, 512);
        assert!(result.truncated());
        assert!(result.additionals().is_empty());
        assert_eq!(result.answers().len(), 10);
    }

    #[test]
    fn test_answers_cut_to_longest_fitting_prefix() {
        let original = message(100, 5);
        let result = truncate(original.clone(), 512);

        assert!(result.truncated());
        assert!(result.additionals().is_empty());
        assert!(encoded_len(&result) <= 512);

        let kept = result.answers().len();
        assert!(kept > 0 && kept < 100);
        assert_eq!(result.answers(), &original.answers()[..kept]);

        // One more answer would not fit.
        let mut bigger = result.clone();
        bigger.add_answer(original.answers()[kept].clone());
        assert!(encoded_len(&bigger) > 512);
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let once = truncate(message(100, 5), 512);
        let twice = truncate(once.clone(), 512);

        assert!(twice.truncated());
        assert_eq!(twice.answers(), once.answers());
        assert_eq!(twice.additionals(), once.additionals());
    }

    #[test]
    fn test_existing_tc_bit_preserved() {
        let mut upstream = message(1, 0);
        upstream.set_truncated(true);

        let result = truncate(upstream, 512);
        assert!(result.truncated());
        assert_eq!(result.answers().len(), 1);
    }

    #[test]
    fn test_question_and_authority_kept() {
        let mut original = message(100, 0);
        original.add_name_server(a_record("web.swan.", 999));

        let result = truncate(original, 512);
        assert_eq!(result.queries().len(), 1);
        assert_eq!(result.name_servers().len(), 1);
    }
}
