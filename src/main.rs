use std::{env, fs::File, io::Write};

use async_graphql::{
    extensions::Logger, http::GraphiQLSource, EmptySubscription, SDLExportOptions, Schema,
};

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};

use axum::{
    extract::State,
    http::header::HeaderMap,
    response::{self, IntoResponse},
    routing::{get, post},
    Router,
};

use clap::{arg, command, Parser};

use simple_logger::SimpleLogger;

use log::info;
use mongodb::Database;

mod authorization;
use authorization::AuthorizedUserHeader;

mod db;
mod error;
mod event_bus;
mod ids;
mod money;

mod inventory;
mod order;
mod payment;
mod promotion;
mod shipment;

mod graphql;
use graphql::mutation::Mutation;
use graphql::query::Query;

mod webhook_http;
use webhook_http::WebhookState;

use payment::credentials::{self, GatewayConfiguration};
use payment::gateway::{self, HttpGatewayProcessor};
use payment::model::PaymentMethodType;

/// Command line argument to toggle schema generation instead of service execution.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Generates GraphQL schema in `./schemas/order.graphql`.
    #[arg(long)]
    generate_schema: bool,
}

/// Activates logger and parses argument for optional schema generation. Otherwise starts the service.
#[tokio::main]
async fn main() -> std::io::Result<()> {
    SimpleLogger::new().init().unwrap();

    let args = Args::parse();
    if args.generate_schema {
        let schema = Schema::build(Query, Mutation, EmptySubscription).finish();
        let mut file = File::create("./schemas/order.graphql")?;
        let sdl_export_options = SDLExportOptions::new().federation();
        let schema_sdl = schema.sdl_with_options(sdl_export_options);
        file.write_all(schema_sdl.as_bytes())?;
        info!("GraphQL schema: ./schemas/order.graphql was successfully generated!");
    } else {
        start_service().await;
    }
    Ok(())
}

/// Describes the handler for GraphQL requests.
///
/// Parses the authorized-user header and writes it into the request's
/// context data, then executes the schema against the request.
async fn graphql_handler(
    State(schema): State<Schema<Query, Mutation, EmptySubscription>>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let mut req = req.into_inner();
    let raw_header = headers
        .get(AuthorizedUserHeader::HEADER_NAME)
        .and_then(|value| value.to_str().ok());
    if let Ok(authorized_user_header) = AuthorizedUserHeader::from_header_value(raw_header) {
        req = req.data(authorized_user_header);
    }
    schema.execute(req).await.into()
}

async fn graphiql() -> impl IntoResponse {
    response::Html(GraphiQLSource::build().endpoint("/").finish())
}

/// Establishes the mongodb client from `$MONGODB_URI`.
async fn db_connection() -> mongodb::Client {
    db::db_connection().await.unwrap()
}

/// Registers an `HttpGatewayProcessor` for `method_type` if its three env
/// vars (`{PREFIX}_BASE_URL`, `{PREFIX}_API_KEY`, `{PREFIX}_WEBHOOK_SECRET`)
/// are all set. Absent config simply leaves that method type unregistered —
/// dispatching a payment against it then fails fast with
/// `CoreError::internal` rather than silently falling back to another
/// gateway (spec §5 "processor registry... populated once at startup").
fn register_gateway_from_env(method_type: PaymentMethodType, env_prefix: &str, master_key: &[u8; 32]) {
    let base_url = env::var(format!("{env_prefix}_BASE_URL"));
    let api_key = env::var(format!("{env_prefix}_API_KEY"));
    let webhook_secret = env::var(format!("{env_prefix}_WEBHOOK_SECRET"));
    let (Ok(base_url), Ok(api_key), Ok(webhook_secret)) = (base_url, api_key, webhook_secret) else {
        info!("no {env_prefix}_* configuration found; {method_type:?} gateway stays unregistered");
        return;
    };

    let sealed_api_key = match credentials::seal(master_key, &api_key) {
        Ok(sealed) => sealed,
        Err(err) => {
            log::error!("failed to seal {env_prefix} credential: {err}");
            return;
        }
    };
    let config = GatewayConfiguration {
        _id: bson::Uuid::new(),
        base_url,
        sealed_api_key,
    };
    match HttpGatewayProcessor::new(env_prefix, config, *master_key, webhook_secret.into_bytes()) {
        Ok(processor) => {
            gateway::register_processor(method_type, std::sync::Arc::new(processor));
            info!("registered {method_type:?} gateway processor from {env_prefix}_* configuration");
        }
        Err(err) => log::error!("failed to build {env_prefix} gateway processor: {err}"),
    }
}

/// Populates the process-wide gateway registry once at startup (spec §5),
/// reading whichever of `STRIPE_*`/`PAYPAL_*` env groups are present. The
/// `CashOnDelivery` processor is always present regardless (registered by
/// `payment::gateway`'s own static initializer).
fn register_configured_gateways() {
    let Ok(master_key) = credentials::master_key_from_env() else {
        info!("GATEWAY_CREDENTIAL_KEY not set; Stripe/PayPal gateways stay unregistered");
        return;
    };
    register_gateway_from_env(PaymentMethodType::Stripe, "STRIPE", &master_key);
    register_gateway_from_env(PaymentMethodType::PayPal, "PAYPAL", &master_key);
}

/// Builds the axum router serving GraphQL at `/` and gateway webhooks at
/// `/webhooks/payment`.
async fn build_router(db_client: Database, client: mongodb::Client) -> Router {
    let schema = Schema::build(Query, Mutation, EmptySubscription)
        .extension(Logger)
        .data(db_client.clone())
        .data(client.clone())
        .finish();

    let graphql_router = Router::new()
        .route("/", get(graphiql).post(graphql_handler))
        .with_state(schema);

    let gateway_secret = env::var("PAYMENT_GATEWAY_SECRET").unwrap_or_default().into_bytes();
    let webhook_state = WebhookState {
        payments: db_client.collection("payments"),
        db: db_client,
        client,
        gateway_secret,
    };
    let webhook_router = Router::new()
        .route("/webhooks/payment", post(webhook_http::on_payment_webhook))
        .with_state(webhook_state);

    Router::new().merge(graphql_router).merge(webhook_router)
}

/// Starts the order service on port 8080.
async fn start_service() {
    register_configured_gateways();
    let client = db_connection().await;
    let db_client: Database = client.database("commerce-core");

    let app = build_router(db_client, client).await;

    info!("GraphiQL IDE: http://0.0.0.0:8080");
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
