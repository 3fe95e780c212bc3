fn main() {
    shopfront_lib::run()
}
