fn main() {
    light_organ_lib::run()
}
