use std::{sync::Arc, time::Duration};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use client_core::{ApiClient, FeedEvent, OrderFeed, SessionStore, VendorClient};
use shared::{
    domain::{BusinessType, NewProduct, NewVendor, Pricing, ProductCategory, ProductId},
    protocol::{LinkUidRequest, ProductRecord},
};
use storage::Storage;

mod config;

use config::{load_settings, normalize_database_url};

#[derive(Parser, Debug)]
struct Cli {
    /// Overrides the configured backend base url.
    #[arg(long)]
    api_base_url: Option<String>,
    /// Overrides the configured session database.
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ProductArgs {
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long)]
    quantity: i64,
    #[arg(long, default_value = "Veggies")]
    category: String,
    #[arg(long)]
    price: Option<f64>,
    #[arg(long)]
    price_500: Option<f64>,
    #[arg(long)]
    price_1000: Option<f64>,
    #[arg(long)]
    min_price: Option<f64>,
}

impl ProductArgs {
    fn into_product(self) -> NewProduct {
        let category = ProductCategory::from_label(&self.category);
        let pricing = if category.is_weight_based() {
            Pricing::PerWeight {
                price_500: self.price_500.unwrap_or_default(),
                price_1000: self.price_1000.unwrap_or_default(),
                min_price: self.min_price.unwrap_or_default(),
            }
        } else {
            Pricing::PerUnit {
                price: self.price.unwrap_or_default(),
            }
        };
        NewProduct {
            name: self.name,
            description: self.description,
            quantity: self.quantity,
            category,
            pricing,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a new shop registration.
    Register {
        shop_name: String,
        owner_name: String,
        business_type: String,
        address: String,
        mobile: String,
    },
    /// Link a verified phone sign-in to its vendor row and store the session.
    Link {
        phone_number: String,
        firebase_uid: String,
    },
    /// Show the stored vendor session.
    Session,
    /// List the vendor's products, optionally filtered by name or category.
    Products {
        #[arg(long)]
        search: Option<String>,
    },
    /// Show one product.
    Product { id: i64 },
    /// Add a product to the catalog.
    AddProduct {
        #[command(flatten)]
        product: ProductArgs,
    },
    /// Update an existing product.
    UpdateProduct {
        id: i64,
        #[command(flatten)]
        product: ProductArgs,
    },
    /// Go online and watch incoming orders until interrupted.
    Dashboard {
        #[arg(long, default_value_t = 30)]
        poll_seconds: u64,
    },
    /// Clear the stored vendor session.
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(api_base_url) = cli.api_base_url {
        settings.api_base_url = api_base_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let database_url = normalize_database_url(&settings.database_url);
    let storage = Storage::new(&database_url).await?;
    let session: Arc<dyn SessionStore> = Arc::new(storage);
    let api = ApiClient::new(settings.api_base_url.clone());
    let client = VendorClient::new(api.clone(), Arc::clone(&session));

    match cli.command {
        Command::Register {
            shop_name,
            owner_name,
            business_type,
            address,
            mobile,
        } => {
            let vendor = NewVendor {
                shop_name,
                owner_name,
                business_type: BusinessType::from_label(&business_type),
                address,
                mobile,
            };
            client.register(&vendor).await?;
            println!("registration submitted; the team will reach out after review");
        }
        Command::Link {
            phone_number,
            firebase_uid,
        } => {
            let vendor_id = api
                .link_vendor_uid(&LinkUidRequest {
                    phone_number,
                    firebase_uid,
                })
                .await?;
            session.set_vendor_id(vendor_id).await?;
            println!("linked vendor_id={}", vendor_id.0);
        }
        Command::Session => match session.vendor_id().await? {
            Some(vendor_id) => println!("vendor_id={}", vendor_id.0),
            None => println!("no session"),
        },
        Command::Products { search } => {
            let products = match search {
                Some(query) => client.search_products(&query).await?,
                None => client.products().await?,
            };
            if products.is_empty() {
                println!("no products");
            }
            for product in products {
                let stock = product.stock.or(product.quantity).unwrap_or_default();
                println!(
                    "#{} {} [{}] stock={} {}",
                    product.id.0,
                    product.name,
                    product.category.as_deref().unwrap_or("-"),
                    stock,
                    describe_price(&product)
                );
            }
        }
        Command::Product { id } => {
            let product = client.product(ProductId(id)).await?;
            println!("#{} {}", product.id.0, product.name);
            if let Some(description) = &product.description {
                println!("  {description}");
            }
            if let Some(category) = &product.category {
                println!("  category: {category}");
            }
            if let Some(quantity) = product.quantity {
                println!("  quantity: {quantity}");
            }
            println!("  {}", describe_price(&product));
        }
        Command::AddProduct { product } => {
            client.add_product(&product.into_product()).await?;
            println!("product added");
        }
        Command::UpdateProduct { id, product } => {
            client
                .update_product(ProductId(id), &product.into_product())
                .await?;
            println!("product updated");
        }
        Command::Dashboard { poll_seconds } => {
            let feed = OrderFeed::with_poll_period(
                api,
                Arc::clone(&session),
                Duration::from_secs(poll_seconds),
            );
            let mut events = feed.subscribe();
            if !feed.set_online(true).await? {
                println!("no vendor session stored; run `vendor_cli link` first");
                return Ok(());
            }
            println!("online; polling every {poll_seconds}s (ctrl-c to stop)");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(FeedEvent::SnapshotReplaced { orders }) => {
                            println!("{} open order(s)", orders.len());
                            for order in &orders {
                                println!("  #{} {} ₹{}", order.id.0, order.status, order.total_amount);
                            }
                        }
                        Ok(FeedEvent::FetchFailed { reason }) => println!("fetch failed: {reason}"),
                        Ok(FeedEvent::OnlineChanged(_)) => {}
                        Err(_) => break,
                    },
                }
            }
            feed.shutdown().await;
            println!("offline");
        }
        Command::Logout => {
            client.sign_out().await?;
            println!("signed out");
        }
    }

    Ok(())
}

fn describe_price(product: &ProductRecord) -> String {
    match (product.price_500, product.price_1000, product.price) {
        (Some(p500), Some(p1000), _) => format!("₹{p500}/500g ₹{p1000}/1kg"),
        (_, _, Some(price)) => format!("₹{price}"),
        _ => String::new(),
    }
}
