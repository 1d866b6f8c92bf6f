use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hackaplan API",
        version = "0.1.0",
        description = "Hackathon winner lookups with live progress."
    ),
    paths(
        crate::routes::create_lookup,
        crate::routes::get_lookup,
        crate::routes::search_hackathons,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CreateLookupRequest,
        crate::dto::CreateLookupResponse,
        crate::dto::LookupResponse,
        crate::dto::ProgressEventResponse,
        crate::dto::ErrorDetail,
        crate::dto::SearchResponse,
        crate::dto::SuggestionResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "lookups", description = "Winner lookup jobs"),
        (name = "search", description = "Hackathon autocomplete"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
