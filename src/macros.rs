/// Emite una o más instrucciones en orden, propagando el primer error.
macro_rules! emit {
    ($generator:expr, $($inst:expr),+ $(,)?) => {{
        $($generator.emit($inst)?;)+
    }};
}
