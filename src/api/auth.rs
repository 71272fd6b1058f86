// src/api/auth.rs

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{post, web, Error, HttpMessage, HttpResponse, Responder};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::task::{Context, Poll};
use utoipa::ToSchema;

use crate::{db, AppState};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: i32,
    admin: bool,
    exp: usize,
}

/// Identity extracted from the bearer token, injected into request
/// extensions by [`JwtMiddleware`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i32,
    pub is_admin: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: i32,
    pub is_admin: bool,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created", body = AuthResponse),
        (status = 400, description = "Email already registered")
    )
)]
#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    payload: web::Json<RegisterRequest>,
) -> impl Responder {
    let password_hash = match hash(&payload.password, DEFAULT_COST) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("bcrypt hash error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let row = match sqlx::query(
        r#"INSERT INTO users (email, password_hash, name, company, tax_id, address, phone)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING id"#,
    )
    .bind(&payload.email)
    .bind(password_hash)
    .bind(payload.name.as_deref())
    .bind(payload.company.as_deref())
    .bind(payload.tax_id.as_deref())
    .bind(payload.address.as_deref())
    .bind(payload.phone.as_deref())
    .fetch_one(&state.pool)
    .await
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("register db error: {e}");
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Există deja un cont cu acest email"
            }));
        }
    };

    let user_id: i32 = row.get("id");

    let token = match generate_jwt(user_id, false) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("jwt encode error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    HttpResponse::Ok().json(AuthResponse {
        token,
        user_id,
        is_admin: false,
    })
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
#[post("/auth/login")]
pub async fn login(state: web::Data<AppState>, payload: web::Json<LoginRequest>) -> impl Responder {
    let user = match db::get_user_by_email(&state.pool, &payload.email).await {
        Ok(u) => u,
        Err(e) => {
            eprintln!("login db error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let Some(user) = user else {
        return HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "Email sau parolă incorectă"
        }));
    };

    match verify(&payload.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Email sau parolă incorectă"
            }));
        }
        Err(e) => {
            eprintln!("bcrypt verify error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let token = match generate_jwt(user.id, user.is_admin) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("jwt encode error: {e}");
            return HttpResponse::InternalServerError().finish();
        }
    };

    HttpResponse::Ok().json(AuthResponse {
        token,
        user_id: user.id,
        is_admin: user.is_admin,
    })
}

pub fn generate_jwt(user_id: i32, is_admin: bool) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = std::env::var("JWT_SECRET").expect("JWT_SECRET required");

    let expiration = Utc::now()
        .checked_add_signed(Duration::days(30))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id,
        admin: is_admin,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
}

/// Token validation shared by the middleware and the SSE route (EventSource
/// cannot set headers, so that route carries the token in the query string).
pub fn decode_token(token: &str) -> Result<AuthUser, Error> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| actix_web::error::ErrorInternalServerError("JWT secret not set"))?;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map(|data| AuthUser {
        id: data.claims.sub,
        is_admin: data.claims.admin,
    })
    .map_err(|_| actix_web::error::ErrorUnauthorized("Invalid token"))
}

/// Middleware that validates `Authorization: Bearer <jwt>` and stores an
/// [`AuthUser`] in the request extensions.
pub struct JwtMiddleware;

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtMiddlewareInner<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtMiddlewareInner { service }))
    }
}

pub struct JwtMiddlewareInner<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareInner<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let auth_header = req
            .headers()
            .get(actix_web::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            match decode_token(token) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                    let fut = self.service.call(req);
                    return Box::pin(async move { fut.await });
                }
                Err(e) => return Box::pin(async move { Err(e) }),
            }
        }

        Box::pin(async move {
            Err(actix_web::error::ErrorUnauthorized(
                "Missing or invalid Authorization header",
            ))
        })
    }
}
