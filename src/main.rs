mod ai;
mod auth;
mod config;
mod dispatch;
mod error;
mod goap;
mod locks;
mod markup;
mod persist;
mod resolve;
mod service;
mod session;
mod tick;
mod transport;
mod world;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ai::AiAdapter;
use config::Config;
use dispatch::RouteOutcome;
use error::ServiceError;
use persist::Persister;
use service::{OutboundMessage, SaveRequest, ServiceResult};
use session::{RateLimiter, SessionPhase, SessionRegistry, OP_AUTH, OP_MESSAGE, OP_PLAN};
use world::World;

/// Everything a connection, the dispatcher or the tick loop needs
#[derive(Clone)]
pub struct ServerCtx {
    pub config: Arc<Config>,

    /// The one shared mutable resource; every mutation happens under
    /// this lock and never across an await on I/O
    pub world: Arc<Mutex<World>>,

    pub sessions: Arc<Mutex<SessionRegistry>>,

    pub limiter: Arc<std::sync::Mutex<RateLimiter>>,

    /// The only path to disk
    pub persist: Arc<Persister>,

    /// Present only when an endpoint is configured
    pub ai: Option<Arc<AiAdapter>>,
}

impl ServerCtx {
    pub async fn send_to_session(&self, session_id: &str, message: OutboundMessage) {
        self.sessions.lock().await.send_to(session_id, message);
    }

    /// Deliver a service result: error or emits to the actor, broadcasts
    /// to room occupants excluding the actor, directs to their targets,
    /// then the save request
    pub async fn deliver(&self, actor: &str, result: ServiceResult) {
        if let Some(err) = &result.error {
            match err {
                // These never reach players; they are logged where they
                // happen and counted by the facade
                ServiceError::Adapter(detail) | ServiceError::Persistence(detail) => {
                    error!("Internal error reached delivery: {detail}");
                    self.send_to_session(actor, OutboundMessage::error(ServiceError::Integrity.to_string()))
                        .await;
                }
                err => {
                    self.send_to_session(actor, OutboundMessage::error(err.to_string()))
                        .await;
                }
            }
        } else {
            for message in &result.emits {
                self.send_to_session(actor, message.clone()).await;
            }
        }

        self.deliver_broadcasts(result.broadcasts, Some(actor)).await;
        {
            let sessions = self.sessions.lock().await;
            for (session_id, message) in result.directs {
                sessions.send_to(&session_id, message);
            }
        }

        match result.save {
            SaveRequest::None => {}
            SaveRequest::Debounced => {
                let world = self.world.lock().await;
                self.persist.save_world(&world, &self.config.world_path, true);
            }
            SaveRequest::Immediate => {
                {
                    let world = self.world.lock().await;
                    self.persist
                        .save_world(&world, &self.config.world_path, false);
                }
                self.persist.flush_all_saves().await;
            }
        }
    }

    /// Fan room-targeted messages out to everyone present, minus the
    /// excluded session, preserving list order
    pub async fn deliver_broadcasts(
        &self,
        broadcasts: Vec<(String, OutboundMessage)>,
        exclude: Option<&str>,
    ) {
        if broadcasts.is_empty() {
            return;
        }
        let targets: Vec<(Vec<String>, OutboundMessage)> = {
            let world = self.world.lock().await;
            broadcasts
                .into_iter()
                .map(|(room_id, message)| {
                    let recipients = world
                        .sessions_in_room(&room_id)
                        .into_iter()
                        .filter(|s| Some(s.as_str()) != exclude)
                        .collect();
                    (recipients, message)
                })
                .collect()
        };
        let sessions = self.sessions.lock().await;
        for (recipients, message) in targets {
            for session_id in recipients {
                sessions.send_to(&session_id, message.clone());
            }
        }
    }

    /// One line of client input, from greeting to goodbye
    pub async fn handle_line(&self, session_id: &str, line: &str) {
        if line.len() > self.config.max_message_len {
            self.send_to_session(
                session_id,
                OutboundMessage::error(format!(
                    "That's too much at once (limit {}).",
                    self.config.max_message_len
                )),
            )
            .await;
            return;
        }

        let phase = self.sessions.lock().await.phase(session_id);
        let Some(phase) = phase else {
            return;
        };

        if phase != SessionPhase::Playing {
            self.handle_auth_line(session_id, &phase, line).await;
            return;
        }

        // Never hold the (sync) limiter lock across an await
        let limited = self
            .limiter
            .lock()
            .expect("limiter lock")
            .check(session_id, OP_MESSAGE);
        if let Err(err) = limited {
            self.send_to_session(session_id, OutboundMessage::error(err.to_string()))
                .await;
            return;
        }

        // Route under the lock; the outcome decides what happens after
        // it's released
        let outcome = {
            let mut world = self.world.lock().await;
            dispatch::route(&mut world, &self.config, session_id, line)
        };

        match outcome {
            RouteOutcome::Done(result) => {
                if result.error == Some(ServiceError::Integrity) {
                    error::report_bug(
                        dispatch::first_word_of(line),
                        &format!("integrity error for session {session_id}"),
                    );
                }
                self.deliver(session_id, result).await;
            }

            RouteOutcome::Quit(result) => {
                self.deliver(session_id, result).await;
                self.sessions.lock().await.shutdown(session_id);
            }

            RouteOutcome::Kick {
                target_session,
                result,
            } => {
                self.deliver(session_id, result).await;
                self.sessions.lock().await.shutdown(&target_session);
            }

            RouteOutcome::Stats => {
                let stats = self.persist.stats();
                let content = format!(
                    "Saves: {} immediate, {} debounced, {} writes, {} errors.",
                    stats.immediate, stats.debounced, stats.writes, stats.errors
                );
                self.send_to_session(session_id, OutboundMessage::system(content))
                    .await;
            }

            RouteOutcome::AiDialogue {
                npc_name,
                prompt,
                said,
            } => {
                let limited = self
                    .limiter
                    .lock()
                    .expect("limiter lock")
                    .check(session_id, OP_PLAN);
                if let Err(err) = limited {
                    self.send_to_session(session_id, OutboundMessage::error(err.to_string()))
                        .await;
                    return;
                }
                // The adapter runs with the world unlocked; fallback
                // keeps dialogue alive without one
                let reply = self.generate_or_fallback(&prompt, ai::fallback_dialogue).await;
                let result = {
                    let mut world = self.world.lock().await;
                    service::chat::install_dialogue(
                        &mut world,
                        session_id,
                        &npc_name,
                        &said,
                        &reply,
                        self.config.social_refill,
                    )
                };
                self.deliver(session_id, result).await;
            }

            RouteOutcome::AiGenerate { room_id, prompt } => {
                let limited = self
                    .limiter
                    .lock()
                    .expect("limiter lock")
                    .check(session_id, OP_PLAN);
                if let Err(err) = limited {
                    self.send_to_session(session_id, OutboundMessage::error(err.to_string()))
                        .await;
                    return;
                }
                let reply = self
                    .generate_or_fallback(&prompt, ai::fallback_npc_json)
                    .await;
                let result = {
                    let mut world = self.world.lock().await;
                    service::npc::install_generated(&mut world, &room_id, &reply)
                };
                self.deliver(session_id, result).await;
            }
        }
    }

    /// Call the adapter if present, otherwise (or on failure) the given
    /// deterministic fallback
    async fn generate_or_fallback(
        &self,
        prompt: &str,
        fallback: fn(&str, &str) -> String,
    ) -> String {
        let world_name = { self.world.lock().await.name.clone() };
        match &self.ai {
            Some(adapter) => match adapter.generate(prompt, 512).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!("AI adapter failed, using fallback: {err}");
                    fallback(&world_name, prompt)
                }
            },
            None => fallback(&world_name, prompt),
        }
    }

    async fn handle_auth_line(&self, session_id: &str, phase: &SessionPhase, line: &str) {
        let limited = self
            .limiter
            .lock()
            .expect("limiter lock")
            .check(session_id, OP_AUTH);
        if let Err(err) = limited {
            self.send_to_session(session_id, OutboundMessage::error(err.to_string()))
                .await;
            return;
        }

        let step = {
            let mut world = self.world.lock().await;
            session::auth_step(&mut world, session_id, phase, line)
        };

        self.sessions
            .lock()
            .await
            .set_phase(session_id, step.next.clone());
        for message in step.messages {
            self.send_to_session(session_id, message).await;
        }

        if let Some(room_id) = step.arrival_room {
            let name = {
                let world = self.world.lock().await;
                world
                    .display_name_of_session(session_id)
                    .unwrap_or("Someone")
                    .to_string()
            };
            self.deliver_broadcasts(
                vec![(
                    room_id,
                    OutboundMessage::system(format!(
                        "{} appears in the world.",
                        markup::bold(&name)
                    )),
                )],
                Some(session_id),
            )
            .await;

            // First sight of the room
            let look = {
                let world = self.world.lock().await;
                service::player::render_look(&world, session_id)
            };
            self.send_to_session(session_id, OutboundMessage::system(look))
                .await;
        }

        match step.save {
            SaveRequest::None => {}
            SaveRequest::Debounced => {
                let world = self.world.lock().await;
                self.persist.save_world(&world, &self.config.world_path, true);
            }
            SaveRequest::Immediate => {
                {
                    let world = self.world.lock().await;
                    self.persist
                        .save_world(&world, &self.config.world_path, false);
                }
                self.persist.flush_all_saves().await;
            }
        }
    }

    /// Socket teardown: unbind, notify, save, forget the counters
    pub async fn disconnect(&self, session_id: &str) {
        let notices = {
            let mut world = self.world.lock().await;
            session::unbind(&mut world, session_id)
        };
        {
            let sessions = self.sessions.lock().await;
            for (target, message) in notices {
                sessions.send_to(&target, message);
            }
        }
        self.sessions.lock().await.remove(session_id);
        self.limiter
            .lock()
            .expect("limiter lock")
            .forget_session(session_id);

        // Logout is a critical moment for the store
        {
            let world = self.world.lock().await;
            self.persist
                .save_world(&world, &self.config.world_path, false);
        }
        self.persist.flush_all_saves().await;
    }
}

#[tokio::main]
async fn main() {
    // Init tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Arc::new(Config::from_env());
    info!("World store: {}", config.world_path);

    // Load, migrate, repair. A store migrations can't salvage means we
    // refuse to serve rather than run on a corrupt world.
    let mut world = match persist::load_world(&config.world_path).await {
        Ok(world) => world,
        Err(err) => {
            error!("Cannot load world store: {err}");
            return;
        }
    };
    let repairs = world::validate::cleanup(&mut world);
    if repairs > 0 {
        info!("Cleanup applied {repairs} repair(s) on load");
    }
    let report = world::validate::audit(&world);
    if !report.is_clean() {
        warn!(
            "World loaded with integrity issues (health {}): {:?}",
            report.health_score(),
            report.issues
        );
    }

    let ai = AiAdapter::from_config(&config);
    if ai.is_some() {
        info!("AI adapter configured");
    } else {
        info!("No AI endpoint; offline generation only");
    }

    let ctx = ServerCtx {
        config: Arc::clone(&config),
        world: Arc::new(Mutex::new(world)),
        sessions: Arc::new(Mutex::new(SessionRegistry::default())),
        limiter: Arc::new(std::sync::Mutex::new(RateLimiter::new(config.rate_enable))),
        persist: Persister::new(config.save_debounce()),
        ai,
    };

    // Save once post-migration so the store is at the current schema
    {
        let world = ctx.world.lock().await;
        ctx.persist.save_world(&world, &config.world_path, true);
    }

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // The websocket server
    tracker.spawn({
        let ctx = ctx.clone();
        let token = token.clone();
        let bind_addr = config.bind_addr.clone();
        async move {
            let addr = SocketAddr::from_str(&bind_addr)
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 9944)));
            let listener = match TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    error!("Cannot bind {addr}: {err}");
                    token.cancel();
                    return;
                }
            };
            info!("Listening on {addr}");
            let app = transport::router(ctx);
            tokio::select! {
                result = axum::serve(listener, app) => {
                    if let Err(err) = result {
                        error!("Server error: {err}");
                    }
                }
                () = token.cancelled() => {}
            }
        }
    });

    // The world heartbeat, if enabled
    if config.tick_enable {
        tracker.spawn(tick::tick_loop(ctx.clone(), token.clone()));
    } else {
        info!("World tick disabled (set TICK_ENABLE=true to enable)");
    }

    // Wait for shutdown signal...
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {err}");
    }
    info!("Shutting down...");

    token.cancel();
    tracker.close();
    tracker.wait().await;

    // Last writes out the door before we go
    {
        let world = ctx.world.lock().await;
        ctx.persist.save_world(&world, &config.world_path, false);
    }
    ctx.persist.flush_all_saves().await;
    info!("Goodbye.");
}
