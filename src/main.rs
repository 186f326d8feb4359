//! lamad-curriculum - course ordering, progress and access gates over MongoDB

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamad_curriculum::{
    cli::{self, Args, Command},
    models::OrderScope,
    services::{join_listener, spawn_logging_listener},
    store::MongoStores,
    Collaborators, CurriculumService, StaticCatalog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so stdout stays clean JSON
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lamad_curriculum={},info", args.log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            args.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!args.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config = args.resolve_config()?;
    debug!(?config, "Resolved configuration");

    let catalog = StaticCatalog::load(&args.catalog)?;
    info!(
        courses = catalog.courses.len(),
        modules = catalog.modules.len(),
        "Loaded catalog from {}",
        args.catalog.display()
    );

    let stores = MongoStores::connect(&config.mongodb_uri, &config.mongodb_db).await?;
    let service = CurriculumService::new(
        Collaborators {
            orders: Arc::new(stores.order_store()),
            progress: Arc::new(stores.progress_store()),
            grades: Arc::new(stores.grade_store()),
            catalog: Arc::new(catalog),
        },
        &config,
    );
    let listener = spawn_logging_listener(service.events.clone());

    match args.command {
        Command::Insert {
            kind,
            parent,
            order,
            title,
            id,
            body_file,
        } => {
            let body_json = body_file.map(std::fs::read_to_string).transpose()?;
            let item = cli::build_item(kind, &parent, &title, id.as_deref(), body_json.as_deref())?;
            let scope = OrderScope::new(kind, parent);
            print_json(&service.insert_ordered_item(&scope, order, item).await?)?;
        }
        Command::Move {
            kind,
            parent,
            item_id,
            order,
        } => {
            let scope = OrderScope::new(kind, parent);
            print_json(&service.move_ordered_item(&scope, &item_id, order).await?)?;
        }
        Command::Delete { kind, parent, item_id } => {
            let scope = OrderScope::new(kind, parent);
            print_json(&service.delete_ordered_item(&scope, &item_id).await?)?;
        }
        Command::List { kind, parent } => {
            let scope = OrderScope::new(kind, parent);
            print_json(&service.list_ordered_items(&scope).await?)?;
        }
        Command::Progress {
            user,
            course,
            module,
            content,
            content_type,
            time,
            completed,
            position,
        } => {
            let update = cli::content_update(
                &user,
                &course,
                &module,
                &content,
                content_type,
                time,
                completed,
                position.as_deref(),
            )?;
            print_json(&service.update_content_progress(&update).await?)?;
        }
        Command::ShowProgress { user, course } => match course {
            Some(course) => print_json(&service.get_course_progress(&user, &course).await?)?,
            None => print_json(&service.list_user_progress(&user).await?)?,
        },
        Command::Access {
            student,
            target,
            course,
        } => {
            if course {
                print_json(&service.check_course_access(&student, &target).await?)?;
            } else {
                print_json(&service.check_access(&student, &target).await?)?;
            }
        }
    }

    // Closing the bus lets the listener drain and exit
    drop(service);
    join_listener(listener).await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
