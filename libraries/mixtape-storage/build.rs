// `sqlx::migrate!` embeds the SQL files at compile time, so a new or edited
// migration has to invalidate the build.
fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
