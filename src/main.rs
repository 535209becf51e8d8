#[actix_web::main]
async fn main() -> std::io::Result<()> {
    liftforms_lib::run().await
}
