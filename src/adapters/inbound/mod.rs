mod api_server;

pub use api_server::{
    build_router, AddServerRequest, ApiError, ApiServer, ApiState, ErrorBody, MaintenanceRequest,
    USER_HEADER,
};
