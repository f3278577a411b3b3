pub mod requests;
pub mod responses;

pub use requests::{
    BackfillRequest, CreateDestinationRequest, CreateRouteRequest, ExchangePublicTokenRequest,
    UpdateRouteRequest,
};
pub use responses::{
    AccountResponse, BackfillJobResponse, ConnectionResponse, DeliveryResponse,
    DestinationResponse, ExchangeResponse, LinkTokenResponse, RouteResponse, StatementResponse,
};
