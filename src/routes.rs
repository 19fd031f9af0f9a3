// src/routes.rs

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, auth, exam, proctoring, profile, question_set},
    state::AppState,
    utils::jwt::{FINGERPRINT_HEADER, admin_middleware, auth_middleware, session_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, profile, exam, question sets, admin).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (repository and config).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(FINGERPRINT_HEADER),
        ]);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let profile_routes = Router::new()
        .route("/me", get(profile::get_me))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Everything under /session needs the token issued by /start.
    let session_routes = Router::new()
        .route("/", get(exam::get_session))
        .route("/modules/{module}/enter", post(exam::enter_module))
        .route("/modules/{module}/complete", post(exam::complete_module))
        .route("/violations", post(proctoring::report_violation))
        .route("/terminate", post(proctoring::terminate_session))
        .route("/complete", post(exam::complete_exam))
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware));

    let exam_routes = Router::new()
        .route("/verify", post(exam::verify_exam))
        .route("/start", post(exam::start_exam))
        .nest("/session", session_routes);

    let question_set_routes = Router::new()
        .route("/{id}", get(question_set::get_question_set))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/exam-codes", post(admin::create_exam_code))
        .route("/question-sets", post(admin::create_question_set))
        .route(
            "/question-sets/{id}/toggle",
            put(admin::toggle_question_set),
        )
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/profile", profile_routes)
        .nest("/api/exam", exam_routes)
        .nest("/api/question-sets", question_set_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (outermost first)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
