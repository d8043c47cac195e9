fn main() {
    pivot_chat_lib::run()
}
