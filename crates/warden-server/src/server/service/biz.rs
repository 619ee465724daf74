use tonic::{Request, Response, Status};
use warden_core::proto::{Nothing, biz_server::Biz};

/// The business surface. Every method is a no-op; whether a call succeeds is
/// decided entirely by the interceptor chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct BizService;

#[tonic::async_trait]
impl Biz for BizService {
    async fn check(&self, _req: Request<Nothing>) -> Result<Response<Nothing>, Status> {
        Ok(Response::new(Nothing {}))
    }

    async fn add(&self, _req: Request<Nothing>) -> Result<Response<Nothing>, Status> {
        Ok(Response::new(Nothing {}))
    }

    async fn test(&self, _req: Request<Nothing>) -> Result<Response<Nothing>, Status> {
        Ok(Response::new(Nothing {}))
    }
}
