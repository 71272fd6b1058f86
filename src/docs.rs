use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::webhooks::stripe_webhook
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::webhooks::WebhookAck
        )
    ),
    tags(
        (name = "auth", description = "Authentication"),
        (name = "webhooks", description = "Payment processor callbacks")
    )
)]
pub struct ApiDoc;
