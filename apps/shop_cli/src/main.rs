use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client_core::{load_settings, ShopClient};
use shared::domain::{AddressId, ProductId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides `api_base_url` from settings.
    #[arg(long)]
    api_base_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        email: String,
        password: String,
    },
    Logout,
    Products {
        #[arg(long)]
        search: Option<String>,
    },
    Cart,
    AddToCart {
        product_id: i64,
        #[arg(long, default_value_t = 1)]
        qty: u32,
    },
    RemoveFromCart {
        product_id: i64,
    },
    Favorites,
    Orders,
    Checkout {
        #[arg(long)]
        address_id: Option<i64>,
    },
    DeleteProduct {
        product_id: i64,
    },
    /// Polls the seller dashboard and prints totals as they change.
    Dashboard {
        #[arg(long, default_value_t = 15)]
        watch_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(api_base_url) = cli.api_base_url {
        settings.api_base_url = api_base_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    let client = ShopClient::connect(settings).await?;

    match cli.command {
        Command::Login { email, password } => {
            let session = client.session().login(&email, &password).await?;
            println!(
                "logged in as {} (user_id={:?}, role={:?})",
                session.email.unwrap_or_default(),
                session.user_id.map(|id| id.0),
                session.role
            );
        }
        Command::Logout => {
            client.logout().await?;
            println!("logged out");
        }
        Command::Products { search } => {
            client.catalog().refresh().await?;
            if let Some(term) = search {
                client.catalog().set_search_term(term);
            }
            for product in client.catalog().visible().current().iter() {
                println!(
                    "{:>6}  {:<32} {:>10.2}",
                    product.id.map(|id| id.0).unwrap_or_default(),
                    product.name,
                    product.price
                );
            }
        }
        Command::Cart => {
            client.cart().refresh().await?;
            for item in client.cart().items().iter() {
                println!(
                    "{:>6}  {:<32} x{:<4} {:>10.2}",
                    item.product.id.map(|id| id.0).unwrap_or_default(),
                    item.product.name,
                    item.quantity,
                    item.line_total()
                );
            }
            println!("total: {:.2}", client.cart().total());
        }
        Command::AddToCart { product_id, qty } => {
            let product = client.catalog().get(ProductId(product_id)).await?;
            client
                .cart()
                .add(&product, qty)?
                .settled()
                .await
                .into_result()?;
            println!("added {qty} x {}", product.name);
        }
        Command::RemoveFromCart { product_id } => {
            client.cart().refresh().await?;
            client
                .cart()
                .remove(ProductId(product_id))?
                .settled()
                .await
                .into_result()?;
            println!("removed product_id={product_id}");
        }
        Command::Favorites => {
            client.favorites().refresh().await?;
            for favorite in client.favorites().favorites().iter() {
                let name = favorite
                    .product
                    .as_ref()
                    .map(|p| p.name.as_str())
                    .unwrap_or("?");
                println!("{:>6}  {name}", favorite.product_id.0);
            }
        }
        Command::Orders => {
            let user_id = client.session().require_user()?;
            for order in client.orders().history(user_id) {
                println!(
                    "{:>6}  {:<10} {:>10.2}  {}",
                    order.id.0,
                    order.status,
                    order.total,
                    order.order_date.to_rfc3339()
                );
            }
        }
        Command::Checkout { address_id } => {
            client.cart().refresh().await?;
            let order = client.checkout(address_id.map(AddressId)).await?;
            println!("{}", serde_json::to_string_pretty(&order)?);
        }
        Command::DeleteProduct { product_id } => {
            let success = client.catalog().delete(ProductId(product_id)).await?;
            println!(
                "deleted product_id={product_id} via {} after {} failed attempt(s)",
                success.strategy,
                success.failures.len()
            );
        }
        Command::Dashboard { watch_secs } => {
            let dashboard = client.dashboard();
            dashboard.totals().subscribe(|totals| {
                println!(
                    "orders={} revenue={:.2} products={}",
                    totals.total_orders, totals.total_revenue, totals.total_products
                );
            });
            dashboard
                .start_polling(client.settings().poll_interval())
                .await;
            tokio::time::sleep(Duration::from_secs(watch_secs)).await;
            dashboard.stop_polling();
            if let Some(seller_id) = client.session().admin_id().await {
                info!(%seller_id, "shop_cli: dashboard watch finished");
            }
        }
    }

    Ok(())
}
