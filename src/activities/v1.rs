//! Protocol revision 1 `MessagingService` implementation.
//!
//! Every unary RPC is a thin dispatch into [`crate::activities`]; the only
//! RPC with real logic here is `poll_command`, which bridges
//! [`proxy_core::relay::RelayChannel`]'s mailbox into a gRPC server stream.

use crate::activities;
use crate::bootstrap::ProxyState;
use proxy_proto::v1::messaging_service_server::MessagingService;
use proxy_proto::v1::*;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

pub struct MessagingServiceV1 {
    state: Arc<ProxyState>,
}

impl MessagingServiceV1 {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }
}

type PollCommandStream = Pin<Box<dyn Stream<Item = Result<PollCommandResponse, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl MessagingService for MessagingServiceV1 {
    async fn query_route(&self, request: Request<QueryRouteRequest>) -> Result<Response<QueryRouteResponse>, Status> {
        activities::query_route(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn query_assignment(
        &self,
        request: Request<QueryAssignmentRequest>,
    ) -> Result<Response<QueryAssignmentResponse>, Status> {
        activities::query_assignment(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn send_message(&self, request: Request<SendMessageRequest>) -> Result<Response<SendMessageResponse>, Status> {
        activities::send_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn receive_message(
        &self,
        request: Request<ReceiveMessageRequest>,
    ) -> Result<Response<ReceiveMessageResponse>, Status> {
        activities::receive_message(&self.state, request).await.map(Response::new)
    }

    async fn ack_message(&self, request: Request<AckMessageRequest>) -> Result<Response<AckMessageResponse>, Status> {
        activities::ack_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn nack_message(&self, request: Request<NackMessageRequest>) -> Result<Response<NackMessageResponse>, Status> {
        activities::nack_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn heartbeat(&self, request: Request<HeartbeatRequest>) -> Result<Response<HeartbeatResponse>, Status> {
        activities::heartbeat(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn health_check(&self, request: Request<HealthCheckRequest>) -> Result<Response<HealthCheckResponse>, Status> {
        activities::health_check(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn notify_client_termination(
        &self,
        request: Request<NotifyClientTerminationRequest>,
    ) -> Result<Response<NotifyClientTerminationResponse>, Status> {
        activities::notify_client_termination(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn end_transaction(
        &self,
        request: Request<EndTransactionRequest>,
    ) -> Result<Response<EndTransactionResponse>, Status> {
        activities::end_transaction(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn pull_message(&self, request: Request<PullMessageRequest>) -> Result<Response<PullMessageResponse>, Status> {
        activities::pull_message(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn query_offset(&self, request: Request<QueryOffsetRequest>) -> Result<Response<QueryOffsetResponse>, Status> {
        activities::query_offset(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn report_thread_stack_trace(
        &self,
        request: Request<ReportThreadStackTraceRequest>,
    ) -> Result<Response<ReportThreadStackTraceResponse>, Status> {
        activities::report_thread_stack_trace(&self.state, request.into_inner()).await.map(Response::new)
    }

    async fn report_message_consumption_result(
        &self,
        request: Request<ReportMessageConsumptionResultRequest>,
    ) -> Result<Response<ReportMessageConsumptionResultResponse>, Status> {
        activities::report_message_consumption_result(&self.state, request.into_inner())
            .await
            .map(Response::new)
    }

    type PollCommandStream = PollCommandStream;

    /// Registers the client's relay mailbox and forwards every queued
    /// `RelayCommand` as a `PollCommandResponse`. The stream never
    /// completes on its own; it ends when the client disconnects or the
    /// mailbox closes (group/client removed by a sweep).
    async fn poll_command(
        &self,
        request: Request<PollCommandRequest>,
    ) -> Result<Response<Self::PollCommandStream>, Status> {
        let req = request.into_inner();
        self.state.relay.touch(&req.group, &req.client_id);
        let mailbox = self.state.relay.register(&req.group, &req.client_id);

        let stream = ReceiverStream::new(mailbox).map(|cmd| Ok(activities::relay_command_to_poll_response(cmd)));
        Ok(Response::new(Box::pin(stream)))
    }
}
