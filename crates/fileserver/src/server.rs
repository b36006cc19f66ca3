//! HTTP server implementation and request routing

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tokio::fs::File;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::{ServedFile, ServerState};

/// Maximum user-agent length kept in request log lines
const USER_AGENT_LOG_LIMIT: usize = 60;

/// File server managing the HTTP routes for one shared file
#[derive(Clone)]
pub struct FileServer {
    state: ServerState,
}

impl FileServer {
    /// Create a new file server around prepared state
    pub fn new(state: ServerState) -> Self {
        Self { state }
    }

    /// Get the server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Create the axum router with all routes configured
    ///
    /// Routes are matched in order: the download route, the info page, and
    /// a fallback that answers everything else with 404. All three record
    /// the requesting client in the ledger.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/:token", get(info_page))
            .route("/download/:token", get(download))
            .fallback(not_found)
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the listening socket
    ///
    /// Binding is separate from serving so the caller can report the local
    /// URL before the tunnel is attempted. Dropping the listener (or the
    /// serve future) releases the socket.
    pub async fn bind(&self, port: u16) -> crate::Result<TcpListener> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!("file server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve requests on a previously bound listener
    pub async fn serve(self, listener: TcpListener) -> crate::Result<()> {
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}

/// Record the client hit and emit the per-request log line
fn log_request(state: &ServerState, addr: Option<SocketAddr>, headers: &HeaderMap) {
    let ip = addr
        .map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let count = state.ledger().record_hit(&ip, agent);
    tracing::info!(
        "request from {} \"{}\" ({} so far from this client)",
        ip,
        truncate_agent(agent),
        count
    );
}

/// Collapse whitespace runs and cap the agent string for log output
fn truncate_agent(agent: &str) -> String {
    let collapsed = agent.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(USER_AGENT_LOG_LIMIT).collect()
}

/// Info page handler: what a browser sees when the share link is opened
async fn info_page(
    State(state): State<ServerState>,
    Path(token): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    log_request(&state, addr.map(|ConnectInfo(a)| a), &headers);

    if token != state.file().token {
        return Err(AppError::NotFound);
    }

    Ok(Html(render_info_page(state.file())))
}

/// Render the download page for the served file
fn render_info_page(file: &ServedFile) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><meta charset=\"utf-8\"><title>{name}</title></head>\n\
         <body>\n\
         <h1>{name}</h1>\n\
         <p>{size} MB</p>\n\
         <p><a href=\"/download/{token}\">Download</a></p>\n\
         </body>\n\
         </html>\n",
        name = file.name,
        size = file.size_mb(),
        token = file.token,
    )
}

/// Download handler: streams the file bytes with attachment headers
async fn download(
    State(state): State<ServerState>,
    Path(token): Path<String>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    log_request(&state, addr.map(|ConnectInfo(a)| a), &headers);

    let file = state.file();
    if token != file.token {
        return Err(AppError::NotFound);
    }

    // The file can disappear after startup. That is a request-scoped
    // failure, not a reason to take the server down.
    let handle = File::open(&file.path)
        .await
        .map_err(|e| AppError::Internal(format!("failed to open {}: {}", file.name, e)))?;
    let size = handle
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("failed to stat {}: {}", file.name, e)))?
        .len();

    let stream = ReaderStream::new(handle);
    let body = Body::from_stream(stream);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.name),
        )
        .header(header::CONTENT_LENGTH, size)
        .body(body)
        .map_err(|e| AppError::Internal(format!("failed to build response: {}", e)))?;

    Ok(response)
}

/// Fallback for any path outside the two token routes
async fn not_found(
    State(state): State<ServerState>,
    addr: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> AppError {
    log_request(&state, addr.map(|ConnectInfo(a)| a), &headers);
    AppError::NotFound
}

/// Application error types
#[derive(Debug)]
enum AppError {
    NotFound,
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "Nothing here. Check the link you were given.",
            ),
            AppError::Internal(msg) => {
                tracing::error!("{}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The shared file could not be read.",
                )
            }
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::generate_access_token;
    use axum::http::Request;
    use std::path::PathBuf;
    use tower::ServiceExt;

    /// Write a throwaway file and wrap it in a ServedFile
    fn temp_served_file(contents: &[u8]) -> ServedFile {
        let path =
            std::env::temp_dir().join(format!("fileserver-test-{}", generate_access_token()));
        std::fs::write(&path, contents).unwrap();
        ServedFile::new(path, contents.len() as u64, generate_access_token())
    }

    fn server_for(file: ServedFile) -> FileServer {
        FileServer::new(ServerState::new(file))
    }

    async fn get(router: &Router, uri: &str) -> Response {
        router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_download_returns_all_bytes_with_length() {
        let contents = vec![0x5a_u8; 4096];
        let file = temp_served_file(&contents);
        let token = file.token.clone();
        let name = file.name.clone();
        let router = server_for(file).router();

        let response = get(&router, &format!("/download/{}", token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            contents.len().to_string().as_str()
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"{}\"", name).as_str()
        );
        assert_eq!(body_bytes(response).await, contents);
    }

    #[tokio::test]
    async fn test_info_page_shows_name_and_size() {
        let contents = vec![0_u8; 524_288];
        let file = temp_served_file(&contents);
        let token = file.token.clone();
        let name = file.name.clone();
        let router = server_for(file).router();

        let response = get(&router, &format!("/{}", token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));

        let html = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(html.contains(&name));
        assert!(html.contains("0.50 MB"));
        assert!(html.contains(&format!("/download/{}", token)));
    }

    #[tokio::test]
    async fn test_other_paths_get_404() {
        let file = temp_served_file(b"hello");
        let token = file.token.clone();
        let router = server_for(file).router();

        for uri in ["/", "/anything-else", "/download/wrong-token", "/a/b/c"] {
            let response = get(&router, uri).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "uri {}", uri);
        }

        // Wrong info token too, not just unmatched routes
        let response = get(&router, "/nottheone1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // The real token still works afterwards
        let response = get(&router, &format!("/{}", token)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_file_yields_500_not_crash() {
        let file = ServedFile::new(
            PathBuf::from("/nonexistent/fileserver-test-gone"),
            42,
            generate_access_token(),
        );
        let token = file.token.clone();
        let router = server_for(file).router();

        let response = get(&router, &format!("/download/{}", token)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Server keeps answering
        let response = get(&router, "/anything").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_every_route_records_the_client() {
        let file = temp_served_file(b"hello");
        let token = file.token.clone();
        let server = server_for(file);
        let router = server.router();

        get(&router, &format!("/{}", token)).await;
        get(&router, &format!("/download/{}", token)).await;
        get(&router, "/not-a-real-path").await;

        // No connect info and no user-agent in oneshot requests, so all
        // three land on the ("unknown", "unknown") key.
        assert_eq!(server.state().ledger().client_count(), 1);
        assert_eq!(server.state().ledger().record_hit("unknown", "unknown"), 4);
    }

    #[test]
    fn test_truncate_agent_collapses_and_caps() {
        assert_eq!(truncate_agent("curl/8.0"), "curl/8.0");
        assert_eq!(
            truncate_agent("Mozilla/5.0   (X11;\t Linux \n x86_64)"),
            "Mozilla/5.0 (X11; Linux x86_64)"
        );

        let long = "agent ".repeat(30);
        assert_eq!(truncate_agent(&long).chars().count(), USER_AGENT_LOG_LIMIT);
    }
}
