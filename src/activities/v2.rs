//! Protocol revision 2 `MessagingService` implementation.
//!
//! Every RPC shared with v1 reuses v1's proto shapes verbatim and
//! dispatches into the same [`crate::activities`] functions -- nothing in
//! `proxy-core` or the conversion helpers branches on protocol version.
//! Only `change_invisible_duration` and `forward_message_to_dead_letter_queue`
//! are specific to this revision, and both reuse
//! [`proxy_core::consumer::ConsumerEngine`] methods v1 exposes as
//! `NackMessage` under a different name/shape.

use crate::activities;
use crate::activities::ok_status;
use crate::bootstrap::ProxyState;
use proxy_core::canonical::{ChangeInvisibleDurationRequest as EngineChangeInvisibleDurationRequest, NackMessageRequest};
use proxy_proto::v1;
use proxy_proto::v2::messaging_service_server::MessagingService;
use proxy_proto::v2::{ChangeInvisibleDurationRequest, ChangeInvisibleDurationResponse};
use proxy_proto::v2::{ForwardMessageToDeadLetterQueueRequest, ForwardMessageToDeadLetterQueueResponse};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

pub struct MessagingServiceV2 {
    state: Arc<ProxyState>,
}

impl MessagingServiceV2 {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }
}

type PollCommandStream = Pin<Box<dyn Stream<Item = Result<v1::PollCommandResponse, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl MessagingService for MessagingServiceV2 {
    async fn query_route(&self, request: Request<v1::QueryRouteRequest>) -> Result<Response<v1::QueryRouteResponse>, Status> {
        activities::query_route(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn query_assignment(
        &self,
        request: Request<v1::QueryAssignmentRequest>,
    ) -> Result<Response<v1::QueryAssignmentResponse>, Status> {
        activities::query_assignment(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn send_message(&self, request: Request<v1::SendMessageRequest>) -> Result<Response<v1::SendMessageResponse>, Status> {
        activities::send_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn receive_message(
        &self,
        request: Request<v1::ReceiveMessageRequest>,
    ) -> Result<Response<v1::ReceiveMessageResponse>, Status> {
        activities::receive_message(&self.state, request).await.map(Response::new)
    }

    async fn ack_message(&self, request: Request<v1::AckMessageRequest>) -> Result<Response<v1::AckMessageResponse>, Status> {
        activities::ack_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    /// Extends a message's invisibility window in place, returning a fresh
    /// receipt handle. Built directly on the engine's own
    /// `change_invisible_duration`, which v1's nack path also uses
    /// internally for its non-DLQ branch.
    async fn change_invisible_duration(
        &self,
        request: Request<ChangeInvisibleDurationRequest>,
    ) -> Result<Response<ChangeInvisibleDurationResponse>, Status> {
        let req = request.into_inner();
        let topic = req
            .topic
            .map(|t| t.name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Status::from(proxy_core::error::ProxyError::client_input("missing topic")))?;

        let result = self
            .state
            .consumer
            .change_invisible_duration(EngineChangeInvisibleDurationRequest {
                topic,
                consumer_group: req.group,
                receipt_handle: req.receipt_handle,
                invisible_duration: Duration::from_millis(req.invisible_duration_millis.max(0) as u64),
                timeout: activities::DEFAULT_RPC_TIMEOUT,
            })
            .await?;

        Ok(Response::new(ChangeInvisibleDurationResponse {
            status: Some(ok_status()),
            receipt_handle: result.new_receipt_handle,
        }))
    }

    /// Forces a message straight to its dead-letter topic by reusing the
    /// nack engine path with the delivery attempt pinned at (or past) the
    /// group's max, which is exactly the condition that trips its
    /// send-to-DLQ branch.
    async fn forward_message_to_dead_letter_queue(
        &self,
        request: Request<ForwardMessageToDeadLetterQueueRequest>,
    ) -> Result<Response<ForwardMessageToDeadLetterQueueResponse>, Status> {
        let req = request.into_inner();
        let topic = req
            .topic
            .map(|t| t.name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Status::from(proxy_core::error::ProxyError::client_input("missing topic")))?;

        let max_delivery_attempts = req.max_delivery_attempts.max(req.delivery_attempt).max(0) as u32;
        self.state
            .consumer
            .nack(NackMessageRequest {
                topic,
                consumer_group: req.group,
                receipt_handle: req.receipt_handle,
                delivery_attempt: max_delivery_attempts,
                max_delivery_attempts,
                timeout: activities::DEFAULT_RPC_TIMEOUT,
            })
            .await?;

        Ok(Response::new(ForwardMessageToDeadLetterQueueResponse { status: Some(ok_status()) }))
    }

    async fn heartbeat(&self, request: Request<v1::HeartbeatRequest>) -> Result<Response<v1::HeartbeatResponse>, Status> {
        activities::heartbeat(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn health_check(&self, request: Request<v1::HealthCheckRequest>) -> Result<Response<v1::HealthCheckResponse>, Status> {
        activities::health_check(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn notify_client_termination(
        &self,
        request: Request<v1::NotifyClientTerminationRequest>,
    ) -> Result<Response<v1::NotifyClientTerminationResponse>, Status> {
        activities::notify_client_termination(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn end_transaction(
        &self,
        request: Request<v1::EndTransactionRequest>,
    ) -> Result<Response<v1::EndTransactionResponse>, Status> {
        activities::end_transaction(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn pull_message(&self, request: Request<v1::PullMessageRequest>) -> Result<Response<v1::PullMessageResponse>, Status> {
        activities::pull_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn query_offset(&self, request: Request<v1::QueryOffsetRequest>) -> Result<Response<v1::QueryOffsetResponse>, Status> {
        activities::query_offset(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn report_thread_stack_trace(
        &self,
        request: Request<v1::ReportThreadStackTraceRequest>,
    ) -> Result<Response<v1::ReportThreadStackTraceResponse>, Status> {
        activities::report_thread_stack_trace(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn report_message_consumption_result(
        &self,
        request: Request<v1::ReportMessageConsumptionResultRequest>,
    ) -> Result<Response<v1::ReportMessageConsumptionResultResponse>, Status> {
        activities::report_message_consumption_result(&self.state, request.into_inner())
            .await
            .map(Response::new)
    }

    type PollCommandStream = PollCommandStream;

    async fn poll_command(
        &self,
        request: Request<v1::PollCommandRequest>,
    ) -> Result<Response<Self::PollCommandStream>, Status> {
        let req = request.into_inner();
        self.state.relay.touch(&req.group, &req.client_id);
        let mailbox = self.state.relay.register(&req.group, &req.client_id);

        let stream = ReceiverStream::new(mailbox).map(|cmd| Ok(activities::relay_command_to_poll_response(cmd)));
        Ok(Response::new(Box::pin(stream)))
    }
}
