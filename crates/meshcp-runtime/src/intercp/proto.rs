//! Messages and service stubs for `meshcp.intercp.v1.InterCpPingService`.
//!
//! ```proto
//! service InterCpPingService {
//!   rpc Ping(PingRequest) returns (PingResponse);
//! }
//! message PingRequest {
//!   string instance_id = 1;
//!   string address = 2;
//!   uint32 inter_cp_port = 3;
//!   bool ready = 4;
//! }
//! message PingResponse {
//!   bool leader = 1;
//! }
//! ```
//!
//! Checked in so the build does not depend on `protoc`.

/// Heartbeat sent by a follower to the leader.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {
    #[prost(string, tag = "1")]
    pub instance_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub address: ::prost::alloc::string::String,
    #[prost(uint32, tag = "3")]
    pub inter_cp_port: u32,
    #[prost(bool, tag = "4")]
    pub ready: bool,
}

/// Leadership status of the instance that answered.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PingResponse {
    #[prost(bool, tag = "1")]
    pub leader: bool,
}

pub const SERVICE_NAME: &str = "meshcp.intercp.v1.InterCpPingService";
const PING_PATH: &str = "/meshcp.intercp.v1.InterCpPingService/Ping";

pub mod inter_cp_ping_service_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::http::Uri;
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct InterCpPingServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> InterCpPingServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }

        pub async fn ping(
            &mut self,
            request: impl tonic::IntoRequest<super::PingRequest>,
        ) -> std::result::Result<tonic::Response<super::PingResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(super::PING_PATH);
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(super::SERVICE_NAME, "Ping"));
            self.inner.unary(req, path, codec).await
        }
    }
}

pub mod inter_cp_ping_service_server {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;

    /// Boxed future returned by service handlers.
    pub type HandlerFuture<'a> = std::pin::Pin<
        Box<
            dyn std::future::Future<
                    Output = std::result::Result<
                        tonic::Response<super::PingResponse>,
                        tonic::Status,
                    >,
                > + Send
                + 'a,
        >,
    >;

    /// Server-side handler for the ping service.
    pub trait InterCpPingService: std::marker::Send + std::marker::Sync + 'static {
        fn ping(&self, request: tonic::Request<super::PingRequest>) -> HandlerFuture<'_>;
    }

    #[derive(Debug)]
    pub struct InterCpPingServiceServer<T> {
        inner: Arc<T>,
    }

    impl<T> InterCpPingServiceServer<T> {
        pub fn new(inner: T) -> Self {
            Self::from_arc(Arc::new(inner))
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for InterCpPingServiceServer<T>
    where
        T: InterCpPingService,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut Context<'_>,
        ) -> Poll<std::result::Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            match req.uri().path() {
                super::PING_PATH => {
                    #[allow(non_camel_case_types)]
                    struct PingSvc<T: InterCpPingService>(pub Arc<T>);
                    impl<T: InterCpPingService> tonic::server::UnaryService<super::PingRequest>
                        for PingSvc<T>
                    {
                        type Response = super::PingResponse;
                        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;
                        fn call(
                            &mut self,
                            request: tonic::Request<super::PingRequest>,
                        ) -> Self::Future {
                            let inner = Arc::clone(&self.0);
                            let fut = async move { inner.ping(request).await };
                            Box::pin(fut)
                        }
                    }
                    let inner = self.inner.clone();
                    let fut = async move {
                        let method = PingSvc(inner);
                        let codec = tonic::codec::ProstCodec::default();
                        let mut grpc = tonic::server::Grpc::new(codec);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    let mut response = http::Response::new(empty_body());
                    let headers = response.headers_mut();
                    headers.insert(
                        "grpc-status",
                        http::HeaderValue::from(tonic::Code::Unimplemented as i32),
                    );
                    headers.insert(
                        http::header::CONTENT_TYPE,
                        http::HeaderValue::from_static("application/grpc"),
                    );
                    Ok(response)
                }),
            }
        }
    }

    impl<T> Clone for InterCpPingServiceServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: self.inner.clone(),
            }
        }
    }

    impl<T> tonic::server::NamedService for InterCpPingServiceServer<T> {
        const NAME: &'static str = super::SERVICE_NAME;
    }
}
