fn main() {
    bilimod::cli::run();
}
