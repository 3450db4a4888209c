use std::{process, sync::Arc};

use cms_sync::{
    application::{
        audit::WebhookAuditService,
        cache_admin::CacheAdminService,
        cms::CmsGateway,
        content::ContentQueryService,
        error::AppError,
        repos::{ContentRepo, WebhookCallsRepo},
        sync::ContentSyncService,
        translation::TranslationGroupResolver,
        webhook::WebhookService,
    },
    cache::{
        EdgeCdn, FrameworkCache, ImageVariants, InvalidationConfig, InvalidationScheduler,
        MultiTierPurger, RelationshipMapper,
    },
    config,
    infra::{
        cdn::HttpEdgeCdn,
        cms::HttpCmsGateway,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, AdminState, HealthProbe, WebhookState},
        revalidate::HttpRevalidator,
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = PostgresRepositories::connect(&settings.database).await?;
    PostgresRepositories::run_migrations(&pool).await?;
    info!(target = "cms_sync::migrate", "migrations applied");
    Ok(())
}

struct ApplicationContext {
    webhook_state: WebhookState,
    admin_state: AdminState,
    scheduler: InvalidationScheduler,
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = PostgresRepositories::connect(&settings.database).await?;
    PostgresRepositories::run_migrations(&pool).await?;
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let app = build_application_context(repositories, &settings)?;
    let scheduler = app.scheduler.clone();

    let result = serve_http(&settings, app.webhook_state, app.admin_state).await;

    info!(
        target = "cms_sync::shutdown",
        pending = scheduler.pending(),
        "flushing pending invalidations"
    );
    if tokio::time::timeout(settings.server.graceful_shutdown, scheduler.flush())
        .await
        .is_err()
    {
        warn!(
            target = "cms_sync::shutdown",
            "invalidation flush did not finish before the shutdown deadline"
        );
    }

    result
}

fn build_application_context(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let content_repo: Arc<dyn ContentRepo> = repositories.clone();
    let calls_repo: Arc<dyn WebhookCallsRepo> = repositories.clone();
    let health: Arc<dyn HealthProbe> = repositories;

    let cms: Option<Arc<dyn CmsGateway>> = HttpCmsGateway::from_settings(&settings.cms)?
        .map(|gateway| Arc::new(gateway) as Arc<dyn CmsGateway>);
    if cms.is_none() {
        warn!(
            target = "cms_sync::startup",
            "cms.project_id not set; translation groups degrade to single documents"
        );
    }

    let invalidation = InvalidationConfig::from(settings);
    let resolver = cms.clone().map(|cms| {
        TranslationGroupResolver::new(cms)
            .with_timeouts(settings.cms.query_timeout, settings.cms.language_timeout)
    });
    let mapper = RelationshipMapper::new(
        cms,
        invalidation.languages.clone(),
        invalidation.relation_timeout(),
    );

    let framework: Option<Arc<dyn FrameworkCache>> =
        HttpRevalidator::from_settings(&settings.invalidation)?
            .map(|revalidator| Arc::new(revalidator) as Arc<dyn FrameworkCache>);
    let cdn: Option<Arc<dyn EdgeCdn>> = HttpEdgeCdn::from_settings(&settings.cdn)?
        .map(|cdn| Arc::new(cdn) as Arc<dyn EdgeCdn>);
    let images = ImageVariants::new(
        settings.images.cdn_base_url.clone(),
        settings.cms.project_id.clone().unwrap_or_default(),
        settings.cms.dataset.clone(),
        settings.images.variant_widths.clone(),
    );
    let purger = MultiTierPurger::new(framework, cdn, settings.cdn.site_url.clone(), images);
    let scheduler = InvalidationScheduler::new(mapper, purger, invalidation.debounce());

    let audit = WebhookAuditService::new(calls_repo);
    let content = ContentQueryService::new(content_repo.clone());
    let sync = ContentSyncService::new(content_repo, invalidation.default_language());
    let webhook = WebhookService::new(
        resolver,
        sync,
        audit.clone(),
        scheduler.clone(),
        settings.webhook.max_requests_per_hour,
    );
    let cache_admin = CacheAdminService::new(scheduler.clone(), audit.clone());

    if settings.webhook.secret.is_none() {
        warn!(
            target = "cms_sync::startup",
            "webhook.secret not set; deliveries will be refused"
        );
    }

    Ok(ApplicationContext {
        webhook_state: WebhookState {
            service: webhook,
            secret: settings.webhook.secret.as_deref().map(Arc::from),
            health: health.clone(),
        },
        admin_state: AdminState {
            cache: cache_admin,
            content,
            audit,
            health,
        },
        scheduler,
    })
}

async fn serve_http(
    settings: &config::Settings,
    webhook_state: WebhookState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let webhook_router = http::build_webhook_router(webhook_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "cms_sync::startup",
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        "listeners bound"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, webhook_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    // A closed channel also means shutdown.
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "cms_sync::shutdown", error = %err, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "cms_sync::shutdown", error = %err, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(target = "cms_sync::shutdown", "shutdown signal received");
}
