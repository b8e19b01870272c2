/// Mixtape CLI - manage group playlists from the terminal
use clap::Parser;
use mixtape_cli::{
    cli::{Cli, Commands},
    commands::{render_order, ExportOptions, Session},
    config::CliConfig,
};
use mixtape_core::UserId;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mixtape=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let session = Session::open(config, UserId::new(cli.user)).await?;
    let result = run(&session, cli.command).await;

    // Flush the cache even when the command failed
    session.close().await?;
    result
}

async fn run(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CreateGroup { name } => {
            let group = session.create_group(&name).await?;
            println!("Created group {} ({})", group.name, group.id);
            println!("Join code: {}", group.join_code);
        }
        Commands::Join { code } => {
            let group = session.join(&code).await?;
            println!("Joined {} ({})", group.name, group.id);
        }
        Commands::Import {
            group,
            file,
            name,
            platform,
        } => {
            let (playlist, songs) = session.import(&group, &file, &name, platform).await?;
            println!(
                "Imported {} songs into {} ({})",
                songs, playlist.name, playlist.id
            );
        }
        Commands::Order { group } => {
            let (order, likes) = session.order(&group).await?;
            println!("{}", render_order(&order, &likes));
        }
        Commands::Sort { group } => {
            let order = session.sort(&group).await?;
            println!("{}", render_order(&order, &[]));
        }
        Commands::ResetSort { group } => {
            let order = session.reset_sort(&group).await?;
            println!("{}", render_order(&order, &[]));
        }
        Commands::Like { group, song } => {
            let liked = session.toggle_like(&group, &song).await?;
            println!("{}", if liked { "Liked" } else { "Unliked" });
        }
        Commands::Export {
            group,
            name,
            playlist,
            public,
            collaborative,
            description,
        } => {
            let options = ExportOptions {
                playlist,
                public,
                collaborative,
                description,
            };
            let outcome = session.export(&group, &name, options).await?;
            println!("{}", outcome.summary());
            if let Some(url) = &outcome.playlist.url {
                println!("{url}");
            }
        }
        Commands::Watch { group } => {
            session.watch(&group).await?;
        }
    }

    Ok(())
}
