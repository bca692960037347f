//! In-memory todo list served over microhttp.
//!
//! ```text
//! cargo run --example todos
//! curl -s localhost:9090/ -d '{"title": "buy milk"}'
//! curl -s 'localhost:9090/?checked=false'
//! curl -s -X PUT localhost:9090/0
//! curl -s -H 'Authorization: ada' localhost:9090/stats
//! ```

use std::sync::{Arc, Mutex};

use microhttp::middleware::layer;
use microhttp::{
    BoxError, IntoReply, LoggerMiddleware, Next, Reply, Request, ServerBuilder, ServerConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Serialize)]
struct Todo {
    id: String,
    title: String,
    checked: bool,
}

#[derive(Debug, Deserialize)]
struct NewTodo {
    title: Option<String>,
}

#[derive(Default)]
struct TodoStore {
    todos: Vec<Todo>,
    next_id: u64,
}

impl TodoStore {
    fn find(&self, id: &str) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == id)
    }

    fn create(&mut self, title: String) -> Todo {
        let todo = Todo {
            id: self.next_id.to_string(),
            title,
            checked: false,
        };
        self.next_id += 1;
        self.todos.push(todo.clone());
        todo
    }

    fn toggle(&mut self, id: &str) -> Option<&Todo> {
        let todo = self.todos.iter_mut().find(|t| t.id == id)?;
        todo.checked = !todo.checked;
        Some(todo)
    }

    fn delete(&mut self, id: &str) -> bool {
        let before = self.todos.len();
        self.todos.retain(|t| t.id != id);
        self.todos.len() != before
    }
}

type Store = Arc<Mutex<TodoStore>>;

/// Caller name set by the token middleware.
#[derive(Clone)]
struct Caller(String);

fn not_found() -> Reply {
    Reply::new(json!({ "error": "id not found" })).with_status(404)
}

fn encode(todo: &Todo) -> Result<Reply, BoxError> {
    Ok(Reply::new(serde_json::to_value(todo)?))
}

fn routes(app: &mut ServerBuilder, store: &Store) -> Result<(), BoxError> {
    let s = Arc::clone(store);
    app.route("GET /", move |req: Request| {
        let store = Arc::clone(&s);
        async move {
            let store = store.lock().map_err(|_| "todo store poisoned")?;
            let todos: Vec<&Todo> = match req.query_param("checked") {
                None | Some("") => store.todos.iter().collect(),
                Some(flag) => {
                    let wanted = !matches!(flag, "0" | "false");
                    store.todos.iter().filter(|t| t.checked == wanted).collect()
                }
            };
            Ok::<_, BoxError>(Reply::new(serde_json::to_value(todos)?))
        }
    })?;

    let s = Arc::clone(store);
    app.route("GET /:id", move |req: Request| {
        let store = Arc::clone(&s);
        async move {
            let store = store.lock().map_err(|_| "todo store poisoned")?;
            match store.find(req.param("id").unwrap_or_default()) {
                Some(todo) => encode(todo),
                None => Ok(not_found()),
            }
        }
    })?;

    let s = Arc::clone(store);
    app.route("POST /", move |req: Request| {
        let store = Arc::clone(&s);
        async move {
            let title = match req.json::<NewTodo>() {
                Ok(NewTodo { title: Some(title) }) if !title.is_empty() => title,
                Ok(_) => {
                    return Ok(Reply::new(json!({ "error": "please provide a todo title" }))
                        .with_status(400));
                }
                Err(_) => {
                    return Ok(Reply::new(json!({ "error": "can not parse json" })).with_status(422));
                }
            };
            let todo = store
                .lock()
                .map_err(|_| "todo store poisoned")?
                .create(title);
            encode(&todo)
        }
    })?;

    let s = Arc::clone(store);
    app.route("PUT /:id", move |req: Request| {
        let store = Arc::clone(&s);
        async move {
            let mut store = store.lock().map_err(|_| "todo store poisoned")?;
            match store.toggle(req.param("id").unwrap_or_default()) {
                Some(todo) => encode(todo),
                None => Ok(not_found()),
            }
        }
    })?;

    let s = Arc::clone(store);
    app.route("DELETE /:id", move |req: Request| {
        let store = Arc::clone(&s);
        async move {
            let mut store = store.lock().map_err(|_| "todo store poisoned")?;
            if store.delete(req.param("id").unwrap_or_default()) {
                Ok::<_, BoxError>(Reply::empty(204))
            } else {
                Ok(not_found())
            }
        }
    })?;

    let require_token = layer(|mut req: Request, next: Next| async move {
        let Some(token) = req.headers().get("Authorization").map(str::to_owned) else {
            return ("token not found", 401).into_reply();
        };
        req.extensions_mut().insert(Caller(token));
        next.run(req).await
    });

    let s = Arc::clone(store);
    app.route_with("GET /stats", require_token, move |req: Request| {
        let store = Arc::clone(&s);
        async move {
            let caller = req
                .extensions()
                .get::<Caller>()
                .map(|c| c.0.clone())
                .unwrap_or_default();
            let store = store.lock().map_err(|_| "todo store poisoned")?;
            let done = store.todos.iter().filter(|t| t.checked).count();
            Ok::<_, BoxError>(json!({
                "caller": caller,
                "total": store.todos.len(),
                "done": done,
            }))
        }
    })?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microhttp=debug,todos=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let store = Store::default();

    let mut app = ServerBuilder::new();
    app.before_all(LoggerMiddleware);
    routes(&mut app, &store)?;

    let server = app.bind(config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await?;

    Ok(())
}
