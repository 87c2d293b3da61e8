//! Request handling: authoritative answers, forwarding and reply sizing.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use hickory_proto::op::{Edns, Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error, trace, warn};

use crate::authority::ClusterAuthority;
use crate::forward::Forwarder;
use crate::metrics::{self, QueryResult, Timer};
use crate::truncate::{max_size, truncate, MIN_UDP_SIZE};

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Reply header for `request` with the given response code.
fn reply_header(request: &Header, code: ResponseCode) -> Header {
    let mut header = Header::response_from_request(request);
    header.set_response_code(code);
    header
}

/// Empty reply carrying only a response code.
pub fn error_reply(request: &Header, code: ResponseCode) -> Message {
    let mut reply = Message::new();
    reply.set_header(reply_header(request, code));
    reply
}

/// Run `fut`, turning a panic into a SERVFAIL reply to the same request.
///
/// The server keeps serving other queries either way.
pub async fn supervise<F>(request: &Header, fut: F) -> (Message, QueryResult)
where
    F: Future<Output = (Message, QueryResult)>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(answered) => answered,
        Err(payload) => {
            error!(
                id = request.id(),
                panic = panic_message(payload.as_ref()),
                "recovered from panic while answering query"
            );
            metrics::record_recovered_panic();
            (
                error_reply(request, ResponseCode::ServFail),
                QueryResult::ServFail,
            )
        }
    }
}

/// Answers in-zone queries from the record store and forwards the rest.
#[derive(Clone)]
pub struct DnsHandler {
    authority: Arc<ClusterAuthority>,
    forwarder: Forwarder,
    recurse_on: bool,
}

impl DnsHandler {
    /// Create a handler. `recurse_on` controls the RA bit on every reply.
    pub fn new(authority: Arc<ClusterAuthority>, forwarder: Forwarder, recurse_on: bool) -> Self {
        Self {
            authority,
            forwarder,
            recurse_on,
        }
    }

    fn rejected(&self, request: &Request, code: ResponseCode) -> (Message, QueryResult) {
        let mut reply = error_reply(request.header(), code);
        reply.set_recursion_available(self.recurse_on);
        (reply, QueryResult::Rejected)
    }

    /// Build the reply for `request`. Response EDNS and sizing for the
    /// transport are applied by the caller.
    pub async fn answer(&self, request: &Request) -> (Message, QueryResult) {
        if request.message_type() != MessageType::Query {
            warn!(id = request.id(), "got a response as a request");
            return self.rejected(request, ResponseCode::FormErr);
        }
        if request.op_code() != OpCode::Query {
            debug!(id = request.id(), op_code = ?request.op_code(), "unimplemented op_code");
            return self.rejected(request, ResponseCode::NotImp);
        }
        if request.queries().len() != 1 {
            debug!(id = request.id(), count = request.queries().len(), "expected exactly one question");
            return self.rejected(request, ResponseCode::FormErr);
        }
        let info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                debug!(id = request.id(), error = %e, "failed to parse request info");
                return self.rejected(request, ResponseCode::FormErr);
            }
        };

        let query = info.query.original().clone();
        if self.authority.is_authoritative(info.query.name()) {
            self.authoritative(request, query)
        } else {
            self.forward(request, query).await
        }
    }

    fn authoritative(&self, request: &Request, query: Query) -> (Message, QueryResult) {
        let ctx = self.authority.resolve(query.name(), query.query_type());
        let result = ctx.result();

        let mut header = reply_header(request.header(), ctx.response_code);
        header.set_authoritative(true);
        header.set_recursion_available(self.recurse_on);

        let mut reply = Message::new();
        reply.set_header(header);
        reply.add_query(query);
        reply.add_answers(ctx.answers);
        reply.add_name_servers(ctx.authority);
        reply.add_additionals(ctx.additionals);

        (reply, result)
    }

    async fn forward(&self, request: &Request, query: Query) -> (Message, QueryResult) {
        let mut upstream = Message::new();
        upstream
            .set_id(request.id())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(request.header().recursion_desired())
            .set_checking_disabled(request.header().checking_disabled());
        upstream.add_query(query.clone());
        if let Some(edns) = request.edns() {
            upstream.set_edns(response_edns(edns));
        }

        trace!(id = request.id(), name = %query.name(), "forwarding query");

        match self.forwarder.forward(&upstream, request.protocol()).await {
            Ok(mut reply) => {
                if reply.answers().is_empty() {
                    debug!(id = request.id(), name = %query.name(), rcode = ?reply.response_code(), "no answer from upstream");
                }
                reply.set_id(request.id());
                (reply, QueryResult::Forwarded)
            }
            Err(e) => {
                let code = e.response_code();
                warn!(id = request.id(), name = %query.name(), error = %e, rcode = ?code, "forwarding failed");

                let mut reply = error_reply(request.header(), code);
                reply.set_recursion_available(self.recurse_on);
                reply.add_query(query);
                let result = match code {
                    ResponseCode::Refused => QueryResult::Refused,
                    _ => QueryResult::ServFail,
                };
                (reply, result)
            }
        }
    }
}

/// EDNS for a reply, advertising at least the classic UDP limit.
fn response_edns(request: &Edns) -> Edns {
    let mut edns = Edns::new();
    edns.set_version(0);
    edns.set_max_payload(request.max_payload().max(MIN_UDP_SIZE as u16));
    edns
}

#[async_trait::async_trait]
impl RequestHandler for DnsHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();
        let query_type = request
            .queries()
            .first()
            .map(|q| q.query_type().to_string())
            .unwrap_or_else(|| "none".to_string());

        let (mut reply, result) = supervise(request.header(), self.answer(request)).await;
        // Relayed replies keep the upstream's RA bit.
        if result != QueryResult::Forwarded {
            reply.set_recursion_available(self.recurse_on);
        }
        *reply.extensions_mut() = request.edns().map(response_edns);
        let reply = truncate(reply, max_size(request.protocol(), request.edns()));

        metrics::record_query(&query_type, result, timer.elapsed());

        let mut builder = MessageResponseBuilder::from_message_request(request);
        if let Some(edns) = reply.extensions().clone() {
            builder.edns(edns);
        }
        let response = builder.build(
            *reply.header(),
            reply.answers().iter(),
            reply.name_servers().iter(),
            &[],
            reply.additionals().iter(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(id = request.id(), error = %e, "failed to send response");
                ResponseInfo::from(*request.header())
            }
        }
    }
}
