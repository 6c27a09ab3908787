use log::info;
use std::sync::Arc;

use crate::bookings::BookingService;
use crate::core::backend::{BackendClient, BackendResult, RowStore, SqlExecutor};
use crate::core::config::AppConfig;
use crate::profiles::ProfileService;
use crate::reviews::ReviewService;
use crate::schema_sync::SchemaReconciler;
use crate::users::UserService;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn RowStore>,
    pub reconciler: Arc<SchemaReconciler>,
    pub profiles: ProfileService,
    pub bookings: Arc<BookingService>,
    pub reviews: ReviewService,
    pub users: UserService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        rpc: Arc<dyn SqlExecutor>,
        store: Arc<dyn RowStore>,
        direct: Option<Arc<dyn SqlExecutor>>,
    ) -> Self {
        let mut reconciler = SchemaReconciler::new(rpc, store.clone(), &config.backend.schema);
        if let Some(direct) = direct {
            reconciler = reconciler.with_direct_channel(direct);
        }
        let reconciler = Arc::new(reconciler);

        let bookings = Arc::new(BookingService::new(store.clone(), reconciler.clone()));
        Self {
            profiles: ProfileService::new(store.clone(), reconciler.clone()),
            reviews: ReviewService::new(store.clone(), reconciler.clone(), bookings.clone()),
            users: UserService::new(store.clone(), reconciler.clone()),
            bookings,
            reconciler,
            store,
            config,
        }
    }

    /// Wires the HTTP client and, when configured, the direct database channel.
    pub fn from_config(config: AppConfig) -> BackendResult<Self> {
        let client = Arc::new(BackendClient::new(&config.backend)?);
        info!("Backend client ready for {}", client.base_url());
        let direct = direct_channel(&config)?;
        Ok(Self::new(config, client.clone(), client, direct))
    }
}

#[cfg(feature = "postgres")]
pub fn direct_channel(config: &AppConfig) -> BackendResult<Option<Arc<dyn SqlExecutor>>> {
    use crate::core::backend::pg::PgExecutor;

    Ok(PgExecutor::connect(&config.database).map(|pg| Arc::new(pg) as Arc<dyn SqlExecutor>))
}

#[cfg(not(feature = "postgres"))]
pub fn direct_channel(config: &AppConfig) -> BackendResult<Option<Arc<dyn SqlExecutor>>> {
    if config.database.url.is_some() {
        log::warn!("database.url is set but this build has no postgres feature, ignoring it");
    }
    Ok(None)
}
