mod archives;
mod lifecycle;
mod support;
