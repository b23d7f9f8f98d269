use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::database::models::{Candle, Instrument};

/// OpenAPI specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stock Feed Service API",
        version = "1.0.0",
        description = "Read access to the instrument universe and stored OHLCV candles",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::get_status,
        handlers::get_instruments,
        handlers::get_candles,
    ),
    components(
        schemas(
            StatusResponse,
            Instrument,
            Candle,
            CandleListResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Service status"),
        (name = "Instruments", description = "Tracked instruments"),
        (name = "Candles", description = "Stored OHLCV candles"),
    )
)]
pub struct ApiDoc;
