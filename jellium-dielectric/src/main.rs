use jellium_dielectric::app::run;

fn main() -> color_eyre::Result<()> {
    run()
}
