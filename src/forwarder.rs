//! The forwarding pipeline: decode → route → resolve → encode.
//! Stateless per call apart from the client cache.

use crate::client::cache::ClientCache;
use crate::client::pool::UdpSocketPool;
use crate::config::Config;
use crate::rules::RuleEngine;
use crate::wire::{Extension, Message, Opcode, QR, Rcode};
use std::sync::Arc;

/// Response size limit assumed for a UDP client that sent no EDNS(0)
/// record (RFC 1035 §4.2.1, the pre-EDNS datagram ceiling).
const CLASSIC_UDP_LIMIT: usize = 512;

/// The long-lived, `Arc`-shared state every request handler forwards
/// through. There is no process-global singleton:
/// the client cache, socket pool, and rule engine (which itself owns
/// the regex cache and geosite store) all live here.
pub struct ForwarderService {
    config: Arc<Config>,
    rules: RuleEngine,
    clients: ClientCache,
}

impl ForwarderService {
    pub fn new(config: Arc<Config>, rules: RuleEngine, pool: Arc<UdpSocketPool>) -> ForwarderService {
        ForwarderService {
            config,
            rules,
            clients: ClientCache::new(pool),
        }
    }

    /// Decodes `request_bytes`, routes it, resolves it against the
    /// chosen upstream, and returns the encoded response. Never returns
    /// `Err` for a per-query failure; every failure mode is mapped to a
    /// synthetic response via a fixed RCODE mapping. The only `Err` case
    /// is a request so malformed its ID can't be recovered, in which
    /// case the caller must drop it rather than reply.
    ///
    /// Response size is unbounded here; callers whose transport has a
    /// hard datagram limit (UDP) should call [`ForwarderService::forward_udp`]
    /// instead.
    pub async fn forward(&self, request_bytes: &[u8]) -> Result<Vec<u8>, ()> {
        self.forward_impl(request_bytes, None).await
    }

    /// Like [`ForwarderService::forward`], but truncates the response
    /// (setting TC) if it would exceed the UDP datagram size the request
    /// advertised via EDNS(0), or 512 bytes absent an EDNS record.
    pub async fn forward_udp(&self, request_bytes: &[u8]) -> Result<Vec<u8>, ()> {
        self.forward_impl(request_bytes, Some(CLASSIC_UDP_LIMIT)).await
    }

    async fn forward_impl(&self, request_bytes: &[u8], udp_limit: Option<usize>) -> Result<Vec<u8>, ()> {
        let request = match Message::from_slice(request_bytes) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("malformed request: {}", e);
                return match recover_id(request_bytes) {
                    Some(id) => encode(error_response(id, Opcode::Query, Rcode::FormErr), udp_limit),
                    None => Err(()),
                };
            }
        };

        let max_size = udp_limit.map(|classic| udp_response_limit(&request.extension, classic));

        let question = match request.questions.first() {
            Some(q) => q,
            None => {
                log::debug!("request {} has an empty question section", request.id);
                return encode(error_response(request.id, request.opcode, Rcode::FormErr), max_size);
            }
        };

        let domain = question.name.to_lowercase();

        let group_name = match self.rules.pick_upstream(&domain) {
            Ok(name) => name,
            Err(_) => {
                log::warn!("no rule matched domain '{}'; this should be unreachable with a catch-all rule", domain);
                return encode(error_response(request.id, request.opcode, Rcode::ServFail), max_size);
            }
        };

        let group = match self.config.groups.get(group_name) {
            Some(g) => g,
            None => {
                // A dangling reference here would have been caught at
                // config load time; this is only reachable if a rule's
                // group name was validated against a different snapshot.
                log::warn!("rule selected unknown upstream group '{}'", group_name);
                return encode(error_response(request.id, request.opcode, Rcode::ServFail), max_size);
            }
        };

        let client = match self.clients.get(group).await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("failed to build upstream client for group '{}': {}", group_name, e);
                return encode(error_response(request.id, request.opcode, Rcode::ServFail), max_size);
            }
        };

        let mut response = match client.exchange(group_name, &request).await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("upstream group '{}' failed: {}", group_name, e);
                return encode(error_response(request.id, request.opcode, Rcode::ServFail), max_size);
            }
        };

        response.id = request.id;
        response.opcode = request.opcode;
        response.qr = QR::Response;
        response.rd = request.rd;
        response.cd = request.cd;
        response.ra = true;
        if response.rcode == Rcode::FormErr {
            response.rcode = Rcode::ServFail;
        }

        encode(response, max_size)
    }
}

/// The UDP response size limit for a request carrying `extension`: the
/// EDNS(0) advertised payload size if present, else `classic_limit`.
fn udp_response_limit(extension: &Option<Extension>, classic_limit: usize) -> usize {
    extension.map(|e| e.payload_size as usize).unwrap_or(classic_limit)
}

fn error_response(id: u16, opcode: Opcode, rcode: Rcode) -> Message {
    Message {
        id,
        rd: false,
        tc: false,
        aa: false,
        opcode,
        qr: QR::Response,
        rcode,
        cd: false,
        ad: false,
        z: false,
        ra: true,
        ..Message::default()
    }
}

/// Encodes `m`, truncating to fit `max_size` (if given) per RFC 1035
/// §4.1.1. `None` means the caller's transport has no datagram size
/// limit (DoH, TCP, TLS).
fn encode(m: Message, max_size: Option<usize>) -> Result<Vec<u8>, ()> {
    let result = match max_size {
        Some(limit) => m.to_vec_truncated(limit),
        None => m.to_vec(),
    };
    result.map_err(|e| {
        log::warn!("failed to encode response: {}", e);
    })
}

/// Best-effort extraction of the 16-bit ID from an otherwise unparsable
/// datagram, so a malformed-but-long-enough request still gets a
/// FormatError reply instead of silent drop.
fn recover_id(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::geosite::GeositeStore;

    #[tokio::test]
    async fn a_request_too_short_to_carry_an_id_is_dropped() {
        let service = test_service().await;
        assert_eq!(service.forward(&[0x00]).await, Err(()));
    }

    #[tokio::test]
    async fn a_malformed_request_with_a_recoverable_id_gets_a_formerr_reply() {
        let service = test_service().await;
        // A plausible-looking ID followed by garbage that won't parse as a
        // DNS header (too short for the fixed 12-byte header).
        let response_bytes = service.forward(&[0x12, 0x34, 0x00]).await.unwrap();
        let response = Message::from_slice(&response_bytes).unwrap();

        assert_eq!(response.id, 0x1234);
        assert_eq!(response.rcode, Rcode::FormErr);
        assert_eq!(response.qr, QR::Response);
    }

    #[tokio::test]
    async fn a_request_with_no_question_gets_a_formerr_reply() {
        let service = test_service().await;
        let request = Message { id: 99, ..Message::default() };
        let request_bytes = request.to_vec().unwrap();

        let response_bytes = service.forward(&request_bytes).await.unwrap();
        let response = Message::from_slice(&response_bytes).unwrap();

        assert_eq!(response.id, 99);
        assert_eq!(response.rcode, Rcode::FormErr);
    }

    #[tokio::test]
    async fn a_request_matching_no_rule_gets_a_servfail_reply() {
        // No rules at all, so pick_upstream always fails.
        let service = test_service().await;
        let mut request = Message { id: 1, ..Message::default() };
        request.add_question("example.com", crate::wire::Type::A, crate::wire::Class::Internet);
        let request_bytes = request.to_vec().unwrap();

        let response_bytes = service.forward(&request_bytes).await.unwrap();
        let response = Message::from_slice(&response_bytes).unwrap();

        assert_eq!(response.rcode, Rcode::ServFail);
    }

    #[tokio::test]
    async fn forward_udp_truncates_an_oversized_formerr_reply_is_untouched() {
        // A FormErr reply carries no answers, so it's never large enough
        // to need truncation; this just confirms forward_udp takes the
        // same path as forward for the common case.
        let service = test_service().await;
        let mut request = Message { id: 5, ..Message::default() };
        request.add_question("example.com", crate::wire::Type::A, crate::wire::Class::Internet);
        let request_bytes = request.to_vec().unwrap();

        let response_bytes = service.forward_udp(&request_bytes).await.unwrap();
        let response = Message::from_slice(&response_bytes).unwrap();

        assert_eq!(response.rcode, Rcode::ServFail);
        assert!(!response.tc);
    }

    async fn test_service() -> ForwarderService {
        let config = Config {
            groups: std::collections::HashMap::new(),
            rules: Vec::new(),
        };
        let rules = RuleEngine::new(Vec::new(), GeositeStore::empty());
        let pool = UdpSocketPool::new(1, &Default::default()).await.unwrap();
        ForwarderService::new(Arc::new(config), rules, Arc::new(pool))
    }
}
